//! モデル学習機能
//!
//! `dataset/<クラス名>/*` の画像から分類モデルを学習し、tar.gz形式で保存します。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::ml::{load_and_normalize_image_with_size, ModelConfig, TbClassifier, CLASS_NAMES};
use crate::model::config::TrainingSettings;
use crate::model::{save_model_with_metadata, ModelMetadata};

/// 学習対象とする画像の拡張子
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// クラスディレクトリ内の画像をファイル名順で列挙
fn list_class_images(class_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(class_dir)
        .with_context(|| format!("クラスディレクトリを読み込めません: {}", class_dir.display()))?
    {
        let path = entry?.path();
        if is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct XrayItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct XrayDataset {
    samples: Vec<XrayItem>,
}

/// クラスごとに分割済みのデータセット
#[derive(Debug)]
pub struct SplitDataset {
    pub train: XrayDataset,
    pub valid: XrayDataset,
}

impl XrayDataset {
    /// 指定されたクラス順序でディレクトリから学習データを読み込み、学習用と検証用に分割
    ///
    /// クラスごとにファイル名でソートし、先頭 `floor(validation_split * n)` 枚を検証用、
    /// 残りを学習用とする。クラスディレクトリが存在しない、または画像が1枚もない場合はエラー。
    pub fn split_from_directory(
        data_dir: &Path,
        class_order: &[&str],
        validation_split: f32,
    ) -> Result<SplitDataset> {
        if !(0.0..1.0).contains(&validation_split) {
            anyhow::bail!("検証データの割合が不正です: {}", validation_split);
        }
        if !data_dir.is_dir() {
            anyhow::bail!("データセットディレクトリが存在しません: {}", data_dir.display());
        }

        let mut train = Vec::new();
        let mut valid = Vec::new();
        let mut empty_classes = Vec::new();

        for (label, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                anyhow::bail!("クラスディレクトリが存在しません: {}", class_dir.display());
            }

            let images = list_class_images(&class_dir)?;
            if images.is_empty() {
                empty_classes.push(class_name.to_string());
                continue;
            }

            let num_valid = (images.len() as f32 * validation_split) as usize;
            tracing::info!(
                "[Dataset] クラス '{}': {} 枚 (学習 {} / 検証 {})",
                class_name,
                images.len(),
                images.len() - num_valid,
                num_valid
            );

            for (i, path) in images.into_iter().enumerate() {
                let item = XrayItem { path, label };
                if i < num_valid {
                    valid.push(item);
                } else {
                    train.push(item);
                }
            }
        }

        if !empty_classes.is_empty() {
            anyhow::bail!(
                "以下のクラスディレクトリに画像が1枚もありません: {}",
                empty_classes.join(", ")
            );
        }

        Ok(SplitDataset {
            train: Self { samples: train },
            valid: Self { samples: valid },
        })
    }

    /// 全画像を最後までデコードできるか検証
    ///
    /// ヘッダーだけでは途中で切れたファイルを検出できないため、画素データまで読み込む
    pub fn validate_images(&self) -> Result<()> {
        let mut unreadable = Vec::new();
        for item in &self.samples {
            if let Err(e) = image::open(&item.path) {
                unreadable.push(format!("{}: {}", item.path.display(), e));
            }
        }
        if !unreadable.is_empty() {
            anyhow::bail!("読み込めない画像があります:\n{}", unreadable.join("\n"));
        }
        Ok(())
    }
}

impl Dataset<XrayItem> for XrayDataset {
    fn get(&self, index: usize) -> Option<XrayItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct XrayBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> XrayBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct XrayBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for XrayBatcher<B> {
    fn batch(&self, items: Vec<XrayItem>, _device: &B::Device) -> XrayBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match load_and_normalize_image_with_size(&item.path, size) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    // 検証後にファイルが変更された場合のみ到達する
                    tracing::warn!("[Batcher] 画像をゼロで埋めます: {}", e);
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        XrayBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<XrayBatch<B>, ClassificationOutput<B>> for TbClassifier<B> {
    fn step(&self, batch: XrayBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<XrayBatch<B>, ClassificationOutput<B>> for TbClassifier<B> {
    fn step(&self, batch: XrayBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習ログの出力先
///
/// 出力モデルと同じディレクトリに `<名前>_training_<日時>` を作る
fn training_artifact_dir(output_model_path: &Path) -> PathBuf {
    let parent = output_model_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = output_model_path
        .file_name()
        .map(|name| name.to_string_lossy().split('.').next().unwrap_or("model").to_string())
        .unwrap_or_else(|| "model".to_string());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
    parent.join(format!("{}_training_{}", stem, stamp))
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub train_samples: usize,
    pub val_samples: usize,
    pub num_params: usize,
}

/// モデル学習を実行
///
/// エポック間のチェックポイントは保存せず、学習完了後のモデルのみを
/// `output_model_path`（tar.gz）に保存する。
pub fn train_model<B: AutodiffBackend>(
    settings: &TrainingSettings,
    output_model_path: &Path,
    device: B::Device,
) -> Result<TrainingReport> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        record::{BinFileRecorder, FullPrecisionSettings},
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    let data_dir = PathBuf::from(&settings.dataset_dir);
    tracing::info!("[Train] 学習データの検証を開始します: {}", data_dir.display());

    let split = XrayDataset::split_from_directory(&data_dir, &CLASS_NAMES, settings.validation_split)?;
    split.train.validate_images()?;
    split.valid.validate_images()?;

    let train_samples = split.train.len();
    let val_samples = split.valid.len();
    tracing::info!("[Train] 学習データ: {} 枚", train_samples);
    tracing::info!("[Train] 検証データ: {} 枚", val_samples);

    let model_config = ModelConfig::new(CLASS_NAMES.len())
        .with_dropout(settings.dropout)
        .with_image_size(settings.image_size);

    tracing::info!(
        "[Train] モデル設定: {} クラス, 入力サイズ: {}x{}, dropout={}",
        model_config.num_classes,
        model_config.image_size,
        model_config.image_size,
        model_config.dropout
    );
    tracing::info!("[Train] 使用デバイス: {:?}", device);

    let batcher_train = XrayBatcher::<B>::new(device.clone(), settings.image_size);
    let batcher_val = XrayBatcher::<B::InnerBackend>::new(device.clone(), settings.image_size);

    // num_workers=0でオンデマンド読み込み
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(0)
        .build(split.train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(settings.batch_size)
        .num_workers(0)
        .build(split.valid);

    let model = model_config.init::<B>(&device);

    // アーティファクトディレクトリ作成（学習ログの出力先、実行ごとに別ディレクトリ）
    let artifact_dir = training_artifact_dir(output_model_path);
    std::fs::create_dir_all(&artifact_dir).with_context(|| {
        format!("アーティファクトディレクトリを作成できません: {}", artifact_dir.display())
    })?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    tracing::info!(
        "[Train] エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    let trained_model = model_trained.model;

    let num_params = trained_model.num_params();
    tracing::info!(
        "[Train] 学習完了: 総パラメータ数 {} ({:.2}M)",
        num_params,
        num_params as f64 / 1_000_000.0
    );

    // BinFileRecorderでf32精度のまま書き出し、推論側はBinBytesRecorderで読み込む
    let temp_model_path = artifact_dir.join("model");
    trained_model
        .save_file(&temp_model_path, &BinFileRecorder::<FullPrecisionSettings>::new())
        .map_err(|e| anyhow::anyhow!("モデルの書き出しに失敗しました: {:?}", e))?;

    let model_binary_path = temp_model_path.with_extension("bin");
    let model_binary = std::fs::read(&model_binary_path)
        .with_context(|| format!("モデルバイナリを読み込めません: {}", model_binary_path.display()))?;
    tracing::info!(
        "[Train] モデルバイナリサイズ: {:.2} MB",
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    let metadata = ModelMetadata::new(
        CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        settings.image_size as u32,
        settings.num_epochs as u32,
        settings.batch_size as u32,
        settings.learning_rate,
        train_samples as u32,
        val_samples as u32,
    );

    let model_path = save_model_with_metadata(output_model_path, &metadata, &model_binary)?;
    tracing::info!("[Train] モデルを保存しました: {}", model_path.display());

    if let Err(e) = std::fs::remove_dir_all(&artifact_dir) {
        tracing::warn!(
            "[Train] アーティファクトディレクトリを削除できません {}: {}",
            artifact_dir.display(),
            e
        );
    }

    Ok(TrainingReport {
        model_path,
        train_samples,
        val_samples,
        num_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::InferenceEngine;
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    fn label_count(dataset: &XrayDataset, label: usize) -> usize {
        dataset.samples.iter().filter(|item| item.label == label).count()
    }

    fn write_image(path: &Path, value: u8) {
        RgbImage::from_pixel(24, 24, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    fn make_dataset(root: &Path, per_class: usize) {
        for (i, class_name) in CLASS_NAMES.iter().enumerate() {
            let dir = root.join(class_name);
            std::fs::create_dir_all(&dir).unwrap();
            for j in 0..per_class {
                write_image(&dir.join(format!("img_{:02}.png", j)), (i * 60) as u8);
            }
            std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        }
    }

    #[test]
    fn test_split_takes_first_files_per_class_for_validation() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path(), 10);

        let split = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).unwrap();
        assert_eq!(split.train.len(), 32);
        assert_eq!(split.valid.len(), 8);
        for label in 0..CLASS_NAMES.len() {
            assert_eq!(label_count(&split.train, label), 8);
            assert_eq!(label_count(&split.valid, label), 2);
        }

        let first_valid = split.valid.get(0).unwrap();
        assert_eq!(first_valid.label, 0);
        assert!(first_valid.path.ends_with("normal/img_00.png"));
        let first_train = split.train.get(0).unwrap();
        assert!(first_train.path.ends_with("normal/img_02.png"));
    }

    #[test]
    fn test_single_image_per_class_goes_to_training() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path(), 1);

        let split = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).unwrap();
        assert_eq!(split.train.len(), 4);
        assert_eq!(split.valid.len(), 0);
        assert!(split.train.validate_images().is_ok());
    }

    #[test]
    fn test_missing_or_empty_class_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(XrayDataset::split_from_directory(&dir.path().join("nope"), &CLASS_NAMES, 0.2).is_err());

        make_dataset(dir.path(), 2);
        std::fs::remove_dir_all(dir.path().join("tb_medium")).unwrap();
        assert!(XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).is_err());

        std::fs::create_dir_all(dir.path().join("tb_medium")).unwrap();
        let err = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).unwrap_err();
        assert!(err.to_string().contains("tb_medium"));
    }

    #[test]
    fn test_unreadable_image_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path(), 1);
        std::fs::write(dir.path().join("tb_low").join("broken.jpg"), b"not an image").unwrap();

        let split = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).unwrap();
        let err = split.train.validate_images().unwrap_err();
        assert!(err.to_string().contains("broken.jpg"));
    }

    #[test]
    fn test_batcher_builds_tensors() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path(), 1);
        let split = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.0).unwrap();

        let items: Vec<XrayItem> = (0..split.train.len())
            .filter_map(|i| split.train.get(i))
            .collect();
        let device = NdArrayDevice::Cpu;
        let batcher = XrayBatcher::<NdArray<f32>>::new(device, 16);
        let batch = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [4, 3, 16, 16]);
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_truncated_image_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path(), 1);

        // ヘッダーは正常で画素データが途中で切れたPNG
        let path = dir.path().join("tb_severe").join("img_00.png");
        RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, ((x * y) % 251) as u8]))
            .save(&path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 20]).unwrap();
        assert!(image::image_dimensions(&path).is_ok());

        let split = XrayDataset::split_from_directory(dir.path(), &CLASS_NAMES, 0.2).unwrap();
        let err = split.train.validate_images().unwrap_err();
        assert!(err.to_string().contains("img_00.png"));
        assert!(err.to_string().contains("tb_severe"));
    }

    #[test]
    fn test_artifact_dir_is_next_to_output_model() {
        let artifact_dir = training_artifact_dir(Path::new("model/tb_model.tar.gz"));
        assert_eq!(artifact_dir.parent(), Some(Path::new("model")));
        let name = artifact_dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("tb_model_training_"));

        let artifact_dir = training_artifact_dir(Path::new("tb_model.tar.gz"));
        assert_eq!(artifact_dir.parent(), Some(Path::new(".")));
    }

    #[test]
    fn test_trained_model_loads_for_inference() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("dataset");
        make_dataset(&dataset_dir, 1);

        let settings = TrainingSettings {
            dataset_dir: dataset_dir.to_string_lossy().to_string(),
            num_epochs: 1,
            batch_size: 4,
            image_size: 32,
            ..TrainingSettings::default()
        };
        let output = dir.path().join("model").join("tb_model.tar.gz");

        let report = train_model::<Autodiff<NdArray<f32>>>(&settings, &output, NdArrayDevice::Cpu).unwrap();
        assert_eq!(report.model_path, output);
        assert_eq!(report.train_samples, 4);
        assert_eq!(report.val_samples, 0);

        // 学習ログのディレクトリは削除され、モデルのみ残る
        let remaining: Vec<_> = std::fs::read_dir(dir.path().join("model"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("tb_model.tar.gz")]);

        let engine = InferenceEngine::<NdArray<f32>>::load(&output, NdArrayDevice::Cpu).unwrap();
        assert_eq!(engine.config().image_size(), 32);

        let image_path = dataset_dir.join("tb_low").join("img_00.png");
        let probabilities = engine.predict_image(&image_path).unwrap();
        assert_eq!(probabilities.len(), CLASS_NAMES.len());
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
}
