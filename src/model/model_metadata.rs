//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 推論時はメタデータのクラス順序と入力サイズからモデルを再構築します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 全クラスラベル（出力インデックス順）
    /// 例: ["normal", "tb_low", "tb_medium", "tb_severe"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（CNNへの入力解像度、通常224x224）
    pub model_input_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// バッチサイズ
    pub batch_size: u32,

    /// 学習率
    pub learning_rate: f64,

    /// 学習データ枚数
    #[serde(default)]
    pub train_samples: u32,

    /// 検証データ枚数
    #[serde(default)]
    pub val_samples: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model_input_size: u32,
        num_epochs: u32,
        batch_size: u32,
        learning_rate: f64,
        train_samples: u32,
        val_samples: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            model_input_size,
            num_epochs,
            batch_size,
            learning_rate,
            train_samples,
            val_samples,
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
