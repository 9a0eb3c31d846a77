//! 診断結果の算出と整形
//!
//! 画像推論の信頼度と症状チェックリストの一致率から総合リスクを算出します。
//! - 信頼度: 最大確率クラスの確率 × 100（小数2桁に丸め）
//! - 症状一致率: チェック数 / 16 × 100（小数2桁に丸め）
//! - 総合リスク: 両者の平均（小数2桁に丸め）

use serde::Serialize;

use super::classes::TbClass;

/// 医師への相談が必須となる総合リスクの閾値（これを超えた場合のみ必須）
pub const CONSULT_REQUIRED_THRESHOLD: f64 = 50.0;

/// 結核検出時の注意事項
pub const PRECAUTIONS: &str = "\n- Wear a mask\n- Avoid close contact\n- Complete TB medication\n- Maintain hygiene";

const SEPARATOR: &str = "──────────────────────────────";

/// 小数2桁に丸める
///
/// 2進数の正確な値から10進で丸める（ちょうど中間の値は偶数側）。
/// `value * 100.0` を経由すると積の誤差で結果がずれることがある。
pub fn round2(value: f64) -> f64 {
    format!("{:.2}", value).parse().unwrap_or(value)
}

fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// パーセント値を表示用に整形（整数値でも `80.0` のように小数1桁は残す）
pub fn format_percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// 画像の推論結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: TbClass,
    /// 信頼度 [0, 100]
    pub confidence: f64,
}

impl Prediction {
    /// クラスごとの確率ベクトルから予測を作成
    ///
    /// 確率ベクトルが空、またはクラス数を超えるインデックスが最大の場合は `None`
    pub fn from_probabilities(probabilities: &[f32]) -> Option<Self> {
        let (index, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((i, p)),
            })?;

        let class = TbClass::from_index(index)?;
        Some(Self {
            class,
            confidence: clamp_percent(round2(probability as f64 * 100.0)),
        })
    }
}

/// 医師への相談の推奨度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consultation {
    Required,
    Recommended,
}

impl Consultation {
    pub fn from_risk(overall_risk: f64) -> Self {
        if overall_risk > CONSULT_REQUIRED_THRESHOLD {
            Consultation::Required
        } else {
            Consultation::Recommended
        }
    }
}

impl std::fmt::Display for Consultation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Consultation::Required => write!(f, "YES 🩺"),
            Consultation::Recommended => write!(f, "Recommended 📌"),
        }
    }
}

/// 症状一致率を算出
pub fn symptom_match(checked: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(round2(checked as f64 / total as f64 * 100.0))
}

/// 総合リスクを算出
pub fn overall_risk(confidence: f64, symptom_match: f64) -> f64 {
    round2((clamp_percent(confidence) + clamp_percent(symptom_match)) / 2.0)
}

/// 診断サマリー
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisSummary {
    pub prediction: TbClass,
    pub confidence: f64,
    pub symptom_match: f64,
    pub severity: String,
    pub overall_risk: f64,
    pub consultation: Consultation,
    pub precautions: String,
}

impl DiagnosisSummary {
    pub fn new(prediction: &Prediction, checked_symptoms: usize, total_symptoms: usize) -> Self {
        let confidence = clamp_percent(prediction.confidence);
        let symptom_match = symptom_match(checked_symptoms, total_symptoms);
        let overall_risk = overall_risk(confidence, symptom_match);

        let precautions = if prediction.class.is_normal() {
            String::new()
        } else {
            PRECAUTIONS.to_string()
        };

        Self {
            prediction: prediction.class,
            confidence,
            symptom_match,
            severity: prediction.class.severity(),
            overall_risk,
            consultation: Consultation::from_risk(overall_risk),
            precautions,
        }
    }

    pub fn tb_detected(&self) -> bool {
        !self.prediction.is_normal()
    }

    pub fn result_text(&self) -> &'static str {
        if self.tb_detected() {
            "Tuberculosis Detected ❗"
        } else {
            "No Tuberculosis Detected ✅"
        }
    }

    /// ダイアログ表示用のテキストを生成
    pub fn render(&self) -> String {
        format!(
            "📋 DIAGNOSIS SUMMARY\n\
             {sep}\n\
             🩺 Result: {result}\n\
             🫁 Image Prediction Confidence: {confidence}%\n\
             📊 Symptom Match: {symptom_match}%\n\
             📌 TB Severity: {severity}\n\
             ⚠️ Overall Risk: {risk}%\n\
             👨‍⚕️ Consult Doctor: {consult}\n\
             🧾 Precautions:{precautions}\n\
             {sep}",
            sep = SEPARATOR,
            result = self.result_text(),
            confidence = format_percent(self.confidence),
            symptom_match = format_percent(self.symptom_match),
            severity = self.severity,
            risk = format_percent(self.overall_risk),
            consult = self.consultation,
            precautions = self.precautions,
        )
    }
}
