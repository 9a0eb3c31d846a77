//! 機械学習モデルの共通定義
//!
//! 胸部X線画像の結核重症度分類用CNNモデルと前処理を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};

pub use crate::diagnosis::{CLASS_NAMES, NUM_CLASSES};

/// 画像サイズ
pub const IMAGE_SIZE: usize = 224;

/// 全結合層のユニット数
const HIDDEN_UNITS: usize = 128;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// Flatten後の特徴次元
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2, stride 2): size -> size / 2 (切り捨て)
    /// これを2段繰り返し、64チャネル * feature_map_size^2
    pub fn feature_dim(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let feature_map_size = after_conv2 / 2;
        64 * feature_map_size * feature_map_size
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> TbClassifier<B> {
        let d = self.feature_dim();
        assert!(
            d > 0,
            "入力サイズが小さすぎます: {} (最小10x10が必要)",
            self.image_size
        );

        tracing::debug!(
            "[Model] 入力サイズ: {}x{}, Flatten後の特徴次元: {}, FC1: {} -> {}, FC2: {} -> {}",
            self.image_size,
            self.image_size,
            d,
            d,
            HIDDEN_UNITS,
            HIDDEN_UNITS,
            self.num_classes
        );

        TbClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(d, HIDDEN_UNITS).init(device),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 結核重症度分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 2層 (32, 64 フィルタ)
/// - Flatten
/// - Dropout
/// - FC: d -> 128 + ReLU
/// - FC: 128 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct TbClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,

    dropout: Dropout,
    fc1: Linear<B>, // d -> 128
    fc2: Linear<B>, // 128 -> num_classes

    activation: Relu,
}

impl<B: Backend> TbClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);
        let x = self.dropout.forward(x);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// ロジットに対するクロスエントロピー（softmax + categorical cross-entropy と等価）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// RGB画像をリサイズし [0, 1] にスケーリング
///
/// # 戻り値
/// - (C, H, W) の順で平坦化した画素値
pub fn normalize_image(img: &RgbImage, size: usize) -> Vec<f32> {
    let resized = if img.width() as usize == size && img.height() as usize == size {
        img.clone()
    } else {
        image::imageops::resize(img, size as u32, size as u32, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for pixel in resized.pixels() {
            data.push(pixel[channel] as f32 / 255.0);
        }
    }
    data
}

/// 画像を読み込んで正規化（サイズ指定版）
pub fn load_and_normalize_image_with_size(
    path: &std::path::Path,
    size: usize,
) -> anyhow::Result<Vec<f32>> {
    let img = image::open(path)
        .map_err(|e| anyhow::anyhow!("画像の読み込みに失敗しました {}: {}", path.display(), e))?
        .to_rgb8();
    Ok(normalize_image(&img, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_dim() {
        let config = ModelConfig::new(NUM_CLASSES);
        assert_eq!(config.image_size, IMAGE_SIZE);
        // 224 -> 222 -> 111 -> 109 -> 54
        assert_eq!(config.feature_dim(), 64 * 54 * 54);

        let small = ModelConfig::new(NUM_CLASSES).with_image_size(32);
        // 32 -> 30 -> 15 -> 13 -> 6
        assert_eq!(small.feature_dim(), 64 * 6 * 6);
    }

    #[test]
    fn test_forward_shapes_and_probabilities() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_CLASSES)
            .with_image_size(32)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let logits = model.forward(images.clone());
        assert_eq!(logits.dims(), [2, NUM_CLASSES]);

        let probs = model
            .forward_probabilities(images)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for row in probs.chunks(NUM_CLASSES) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_normalize_image_resizes_and_scales() {
        let img = RgbImage::from_pixel(64, 48, Rgb([255, 0, 51]));
        let data = normalize_image(&img, 16);
        assert_eq!(data.len(), 3 * 16 * 16);

        let plane = 16 * 16;
        // リサンプリングの丸め誤差は1階調まで許容
        let tolerance = 1.0 / 255.0 + 1e-6;
        assert!(data[..plane].iter().all(|v| (*v - 1.0).abs() <= tolerance));
        assert!(data[plane..2 * plane].iter().all(|v| v.abs() <= tolerance));
        assert!(data[2 * plane..].iter().all(|v| (*v - 0.2).abs() <= tolerance));
    }

    #[test]
    fn test_load_image_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xray.png");
        RgbImage::from_pixel(40, 40, Rgb([128, 128, 128]))
            .save(&path)
            .unwrap();

        let data = load_and_normalize_image_with_size(&path, 20).unwrap();
        assert_eq!(data.len(), 3 * 20 * 20);
        assert!(load_and_normalize_image_with_size(&dir.path().join("missing.png"), 20).is_err());
    }
}
