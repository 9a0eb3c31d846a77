//! モデル推論機能

use anyhow::Result;
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::diagnosis::XrayClassifier;
use crate::ml::{load_and_normalize_image_with_size, ModelConfig, TbClassifier};
use crate::model::{load_model_with_metadata, InferenceConfig};

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: TbClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let config = InferenceConfig::from_metadata(&metadata);
        config.validate_class_order()?;

        // 推論時はドロップアウトなし
        let model_config = ModelConfig::new(config.num_total_classes())
            .with_dropout(0.0)
            .with_image_size(config.image_size());
        let model = model_config.init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        let model = model.load_record(record);

        tracing::info!(
            "[Inference] モデルを読み込みました: {} ({} パラメータ)",
            model_path.as_ref().display(),
            model.num_params()
        );
        config.print_info();

        Ok(Self {
            model,
            config,
            device,
        })
    }

    /// 単一画像のクラスごとの確率を取得
    pub fn predict_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Vec<f32>> {
        let size = self.config.image_size();
        let image_data = load_and_normalize_image_with_size(image_path.as_ref(), size)?;

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        let probabilities = self
            .model
            .forward_probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        Ok(probabilities)
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

impl<B: Backend> XrayClassifier for InferenceEngine<B> {
    fn predict_probabilities(&self, image_path: &Path) -> Result<Vec<f32>> {
        self.predict_image(image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{CLASS_NAMES, NUM_CLASSES};
    use crate::model::{save_model_with_metadata, ModelMetadata};
    use burn::record::BinFileRecorder;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    /// 学習済みモデルと同じ手順（BinFileRecorder → tar.gz）で小さなモデルを保存
    fn save_small_model(dir: &Path, image_size: usize, class_labels: &[&str]) -> std::path::PathBuf {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_CLASSES)
            .with_image_size(image_size)
            .init::<TestBackend>(&device);

        let weights_path = dir.join("weights");
        model
            .save_file(&weights_path, &BinFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();
        let binary = std::fs::read(weights_path.with_extension("bin")).unwrap();

        let metadata = ModelMetadata::new(
            class_labels.iter().map(|s| s.to_string()).collect(),
            image_size as u32,
            5,
            16,
            1e-3,
            4,
            0,
        );
        save_model_with_metadata(&dir.join("model").join("tb_model"), &metadata, &binary).unwrap()
    }

    #[test]
    fn test_saved_model_loads_and_predicts() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = save_small_model(dir.path(), 32, &CLASS_NAMES);

        let engine = InferenceEngine::<TestBackend>::load(&model_path, NdArrayDevice::Cpu).unwrap();
        assert_eq!(engine.config().image_size(), 32);

        // 入力画像のサイズは任意（リサイズされる）
        let image_path = dir.path().join("xray.jpg");
        RgbImage::from_pixel(50, 70, Rgb([90, 90, 90]))
            .save(&image_path)
            .unwrap();

        let probabilities = engine.predict_probabilities(&image_path).unwrap();
        assert_eq!(probabilities.len(), NUM_CLASSES);
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);

        let prediction = crate::diagnosis::Prediction::from_probabilities(&probabilities).unwrap();
        assert!((0.0..=100.0).contains(&prediction.confidence));
    }

    #[test]
    fn test_wrong_class_order_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = save_small_model(
            dir.path(),
            32,
            &["tb_severe", "tb_medium", "tb_low", "normal"],
        );
        assert!(InferenceEngine::<TestBackend>::load(&model_path, NdArrayDevice::Cpu).is_err());
    }

    #[test]
    fn test_unreadable_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = save_small_model(dir.path(), 32, &CLASS_NAMES);
        let engine = InferenceEngine::<TestBackend>::load(&model_path, NdArrayDevice::Cpu).unwrap();

        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"garbage").unwrap();
        assert!(engine.predict_probabilities(&bad).is_err());
    }
}
