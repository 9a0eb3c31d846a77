//! 症状チェックリスト

use serde::Serialize;

/// チェックリストの症状名（固定16項目）
pub const SYMPTOM_NAMES: [&str; 16] = [
    "chills",
    "vomiting",
    "fatigue",
    "weight_loss",
    "cough",
    "high_fever",
    "breathlessness",
    "sweating",
    "loss_of_appetite",
    "mild_fever",
    "yellowing_of_eyes",
    "swelled_lymph_nodes",
    "malaise",
    "phlegm",
    "chest_pain",
    "blood_in_sputum",
];

/// 表示名に変換 (`weight_loss` → `Weight Loss`)
pub fn display_name(symptom: &str) -> String {
    symptom
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// フロントエンドへ返すチェックリスト項目
#[derive(Debug, Clone, Serialize)]
pub struct SymptomEntry {
    pub key: &'static str,
    pub label: String,
    pub checked: bool,
}

/// 症状ごとのチェック状態
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymptomChecklist {
    checked: [bool; SYMPTOM_NAMES.len()],
}

impl SymptomChecklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// 症状のチェック状態を設定
    ///
    /// 未知の症状名の場合は `false` を返し、状態は変更しない
    pub fn set(&mut self, symptom: &str, checked: bool) -> bool {
        match SYMPTOM_NAMES.iter().position(|s| *s == symptom) {
            Some(idx) => {
                self.checked[idx] = checked;
                true
            }
            None => false,
        }
    }

    pub fn checked_count(&self) -> usize {
        self.checked.iter().filter(|c| **c).count()
    }

    pub fn total(&self) -> usize {
        SYMPTOM_NAMES.len()
    }

    pub fn entries(&self) -> Vec<SymptomEntry> {
        SYMPTOM_NAMES
            .iter()
            .zip(self.checked.iter())
            .map(|(key, checked)| SymptomEntry {
                key: *key,
                label: display_name(key),
                checked: *checked,
            })
            .collect()
    }
}
