//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデル・学習設定をJSON形式で保存・読み込みします。
//! 設定ファイルが存在しない場合のデフォルト値は固定の学習条件
//! （224x224, バッチ16, 5エポック, 検証20%）と一致します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習結果の保存先、かつ診断フォームが起動時に読み込むモデルファイル
    pub model_path: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "model/tb_model.tar.gz".to_string(),
        }
    }
}

impl ModelSettings {
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.model_path)
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 学習データのルート（クラスごとのサブディレクトリを含む）
    pub dataset_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率（Adam）
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f32,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            dataset_dir: "dataset".to_string(),
            num_epochs: 5,
            batch_size: 16,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
            image_size: 224,
            dropout: 0.5,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        Self::load_from_or_default(Self::default_path())
    }

    pub fn load_from_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("[Config] 設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "[Config] 設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("[Config] 設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("モデルパス: {}", self.model.model_path);
        tracing::info!("--- トレーニング設定 ---");
        tracing::info!("データセット: {}", self.training.dataset_dir);
        tracing::info!("エポック数: {}", self.training.num_epochs);
        tracing::info!("バッチサイズ: {}", self.training.batch_size);
        tracing::info!("学習率: {}", self.training.learning_rate);
        tracing::info!("検証データ割合: {}", self.training.validation_split);
        tracing::info!(
            "入力サイズ: {}x{}",
            self.training.image_size,
            self.training.image_size
        );
        tracing::info!("ドロップアウト率: {}", self.training.dropout);
        tracing::info!("シード: {}", self.training.seed);
    }
}
