//! 診断フォームの状態管理
//!
//! 状態遷移:
//! - `Idle` → (画像アップロード) → `ImageLoaded`
//! - `ImageLoaded` → (診断実行) → `ResultShown`
//! - `ResultShown` → (画像アップロード) → `ImageLoaded`
//! - `Idle` で診断実行した場合はエラーを返し、`Idle` のまま（モデルは呼ばない）

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::summary::{DiagnosisSummary, Prediction};
use super::symptoms::{SymptomChecklist, SymptomEntry};

/// X線画像の分類器
///
/// 画像ファイルを読み込み、クラスごとの確率ベクトル（インデックス順）を返す
pub trait XrayClassifier {
    fn predict_probabilities(&self, image_path: &Path) -> anyhow::Result<Vec<f32>>;
}

/// フォームの操作エラー
#[derive(Debug, Error)]
pub enum FormError {
    #[error("Please upload an X-ray image first.")]
    NoImage,
    #[error("Unknown symptom: {0}")]
    UnknownSymptom(String),
    #[error("Prediction returned an invalid probability vector ({0} values)")]
    InvalidPrediction(usize),
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// フォームの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormState {
    Idle,
    ImageLoaded,
    ResultShown,
}

/// フロントエンドへ返すフォーム状態のスナップショット
#[derive(Debug, Clone, Serialize)]
pub struct FormSnapshot {
    pub state: FormState,
    pub image_path: Option<String>,
    pub symptoms: Vec<SymptomEntry>,
}

/// 診断フォーム
#[derive(Debug)]
pub struct DiagnosisForm {
    state: FormState,
    image_path: Option<PathBuf>,
    symptoms: SymptomChecklist,
}

impl Default for DiagnosisForm {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosisForm {
    pub fn new() -> Self {
        Self {
            state: FormState::Idle,
            image_path: None,
            symptoms: SymptomChecklist::new(),
        }
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    pub fn symptoms(&self) -> &SymptomChecklist {
        &self.symptoms
    }

    /// 画像を読み込み済みにする（以前の画像は置き換え）
    pub fn load_image(&mut self, path: PathBuf) {
        self.image_path = Some(path);
        self.state = FormState::ImageLoaded;
    }

    pub fn set_symptom(&mut self, symptom: &str, checked: bool) -> Result<(), FormError> {
        if self.symptoms.set(symptom, checked) {
            Ok(())
        } else {
            Err(FormError::UnknownSymptom(symptom.to_string()))
        }
    }

    /// 診断を実行
    ///
    /// 画像未読み込みの場合は分類器を呼ばずに `FormError::NoImage` を返す。
    /// 推論に失敗した場合は状態を変更しない。
    pub fn diagnose(&mut self, classifier: &dyn XrayClassifier) -> Result<DiagnosisSummary, FormError> {
        let image_path = match self.image_path.clone() {
            Some(path) if self.state != FormState::Idle => path,
            _ => {
                self.state = FormState::Idle;
                return Err(FormError::NoImage);
            }
        };

        let probabilities = classifier.predict_probabilities(&image_path)?;
        let prediction = Prediction::from_probabilities(&probabilities)
            .ok_or(FormError::InvalidPrediction(probabilities.len()))?;

        let summary = DiagnosisSummary::new(
            &prediction,
            self.symptoms.checked_count(),
            self.symptoms.total(),
        );

        tracing::info!(
            "[Diagnosis] {} (confidence {}%, symptoms {}/{}, risk {}%)",
            summary.prediction,
            summary.confidence,
            self.symptoms.checked_count(),
            self.symptoms.total(),
            summary.overall_risk
        );

        self.state = FormState::ResultShown;
        Ok(summary)
    }

    pub fn snapshot(&self) -> FormSnapshot {
        FormSnapshot {
            state: self.state,
            image_path: self
                .image_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            symptoms: self.symptoms.entries(),
        }
    }
}
