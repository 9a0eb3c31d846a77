//! 結核重症度クラスの定義

use serde::Serialize;

/// クラス数
pub const NUM_CLASSES: usize = 4;

/// クラス名の定義（インデックス順 = 学習データのディレクトリ名）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["normal", "tb_low", "tb_medium", "tb_severe"];

/// 胸部X線画像の分類クラス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TbClass {
    Normal,
    TbLow,
    TbMedium,
    TbSevere,
}

impl TbClass {
    pub const ALL: [TbClass; NUM_CLASSES] = [
        TbClass::Normal,
        TbClass::TbLow,
        TbClass::TbMedium,
        TbClass::TbSevere,
    ];

    /// クラスインデックスから取得
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        CLASS_NAMES[self.index()]
    }

    pub fn is_normal(self) -> bool {
        self == TbClass::Normal
    }

    /// 重症度ラベル
    ///
    /// `normal` は `-`、それ以外は最初の `_` 以降を先頭大文字化したもの
    /// (例: `tb_severe` → `Severe`)
    pub fn severity(self) -> String {
        if self.is_normal() {
            return "-".to_string();
        }
        severity_from_class_name(self.as_str())
    }
}

impl std::fmt::Display for TbClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// クラス名の `_` 区切り2番目の要素を capitalize する
fn severity_from_class_name(name: &str) -> String {
    let suffix = name.split('_').nth(1).unwrap_or(name);
    let mut chars = suffix.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip_matches_class_names() {
        for (i, name) in CLASS_NAMES.iter().enumerate() {
            let class = TbClass::from_index(i).unwrap();
            assert_eq!(class.as_str(), *name);
        }
        assert_eq!(TbClass::from_index(NUM_CLASSES), None);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(TbClass::Normal.severity(), "-");
        assert_eq!(TbClass::TbLow.severity(), "Low");
        assert_eq!(TbClass::TbMedium.severity(), "Medium");
        assert_eq!(TbClass::TbSevere.severity(), "Severe");
    }
}
