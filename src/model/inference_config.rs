//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use anyhow::Result;

use crate::diagnosis::CLASS_NAMES;
use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// 全クラスラベル（出力インデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub model_input_size: u32,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            model_input_size: metadata.model_input_size,
        }
    }

    /// クラス数を取得
    pub fn num_total_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn image_size(&self) -> usize {
        self.model_input_size as usize
    }

    /// クラス順序が診断フォームの想定と一致するか検証
    ///
    /// 出力インデックスをそのまま `TbClass` として扱うため、順序の不一致はエラー
    pub fn validate_class_order(&self) -> Result<()> {
        if self.class_labels.iter().map(|s| s.as_str()).ne(CLASS_NAMES.iter().copied()) {
            anyhow::bail!(
                "モデルのクラス順序が不正です: [{}] (期待: [{}])",
                self.class_labels.join(", "),
                CLASS_NAMES.join(", ")
            );
        }
        if self.model_input_size == 0 {
            anyhow::bail!("モデル入力サイズが0です");
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        tracing::info!(
            "[Inference] クラス: {} / 入力サイズ: {}x{}",
            self.class_labels.join(", "),
            self.model_input_size,
            self.model_input_size
        );
    }
}
