//! クラスラベルの定義と確率ベクトルからの復元

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// 部位と状態の区切り文字
pub const LABEL_SEPARATOR: char = '_';

/// クラス数
pub const NUM_CLASSES: usize = 8;

/// 分類クラス（部位_状態）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassLabel {
    BoneFracture,
    BrainNormal,
    BrainTumor,
    BoneNormal,
    ChestNormal,
    ChestPneumonia,
    SpineIssue,
    SpineNormal,
}

impl ClassLabel {
    /// 標準のクラス順序
    pub const ALL: [ClassLabel; NUM_CLASSES] = [
        ClassLabel::BoneFracture,
        ClassLabel::BrainNormal,
        ClassLabel::BrainTumor,
        ClassLabel::BoneNormal,
        ClassLabel::ChestNormal,
        ClassLabel::ChestPneumonia,
        ClassLabel::SpineIssue,
        ClassLabel::SpineNormal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::BoneFracture => "BONE_FRACTURE",
            ClassLabel::BrainNormal => "BRAIN_NORMAL",
            ClassLabel::BrainTumor => "BRAIN_TUMOR",
            ClassLabel::BoneNormal => "BONE_NORMAL",
            ClassLabel::ChestNormal => "CHEST_NORMAL",
            ClassLabel::ChestPneumonia => "CHEST_PNEUMONIA",
            ClassLabel::SpineIssue => "SPINE_ISSUE",
            ClassLabel::SpineNormal => "SPINE_NORMAL",
        }
    }

    /// (部位, 状態) に分割
    pub fn split(&self) -> (&'static str, &'static str) {
        // 固定ラベルは必ず区切り文字を1つだけ含む
        self.as_str()
            .split_once(LABEL_SEPARATOR)
            .unwrap_or((self.as_str(), ""))
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        ClassLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| ClassifierError::MalformedLabel(s.to_string()))
    }
}

/// ラベルを (部位, 状態) に分割
///
/// 区切り文字がちょうど1つでない場合は `MalformedLabel` を返します。
pub fn split_label(label: &str) -> Result<(String, String)> {
    let mut parts = label.split(LABEL_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(body_part), Some(condition), None) => {
            Ok((body_part.to_string(), condition.to_string()))
        }
        _ => Err(ClassifierError::MalformedLabel(label.to_string())),
    }
}

/// 最大スコアのインデックス
///
/// 同値の場合は小さいインデックスを優先します。NaN は選ばれません。
/// 空のベクトルでは `None`。
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            None if !score.is_nan() => best = Some((i, score)),
            Some((_, current)) if score > current => best = Some((i, score)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// ラベル復元の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedLabel {
    pub index: usize,
    pub label: String,
    pub body_part: String,
    pub condition: String,
    pub confidence: f32,
}

/// クラスインデックス順のラベル一覧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// 標準の8クラス
    pub fn standard() -> Self {
        Self::new(ClassLabel::ALL.iter().map(|l| l.as_str().to_string()).collect())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    /// 標準クラスに含まれないラベル
    pub fn unknown_labels(&self) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|l| l.parse::<ClassLabel>().is_err())
            .map(String::as_str)
            .collect()
    }

    /// 確率ベクトルからラベルを復元
    pub fn decode(&self, probabilities: &[f32]) -> Result<DecodedLabel> {
        if probabilities.len() != self.labels.len() {
            return Err(ClassifierError::IndexOutOfRange {
                index: probabilities.len().saturating_sub(1),
                len: self.labels.len(),
            });
        }

        let index = argmax(probabilities).ok_or(ClassifierError::IndexOutOfRange {
            index: 0,
            len: self.labels.len(),
        })?;

        let label = self.get(index).ok_or(ClassifierError::IndexOutOfRange {
            index,
            len: self.labels.len(),
        })?;
        let (body_part, condition) = split_label(label)?;

        Ok(DecodedLabel {
            index,
            label: label.to_string(),
            body_part,
            condition,
            confidence: probabilities[index],
        })
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_standard_label_splits_once() {
        for label in ClassLabel::ALL {
            let s = label.as_str();
            assert_eq!(s.matches(LABEL_SEPARATOR).count(), 1, "{}", s);

            let (body_part, condition) = split_label(s).unwrap();
            assert_eq!((body_part.as_str(), condition.as_str()), label.split());
            assert_eq!(format!("{}_{}", body_part, condition), s);
        }
    }

    #[test]
    fn test_chest_pneumonia_split() {
        assert_eq!(
            split_label("CHEST_PNEUMONIA").unwrap(),
            ("CHEST".to_string(), "PNEUMONIA".to_string())
        );
        assert_eq!(ClassLabel::ChestPneumonia.split(), ("CHEST", "PNEUMONIA"));
    }

    #[test]
    fn test_malformed_labels() {
        assert!(matches!(split_label("CHEST"), Err(ClassifierError::MalformedLabel(_))));
        assert!(matches!(
            split_label("CHEST_X_RAY"),
            Err(ClassifierError::MalformedLabel(_))
        ));
    }

    #[test]
    fn test_standard_order() {
        let labels = LabelSet::standard();
        assert_eq!(labels.len(), NUM_CLASSES);
        assert_eq!(labels.get(0), Some("BONE_FRACTURE"));
        assert_eq!(labels.get(7), Some("SPINE_NORMAL"));
        assert!(labels.unknown_labels().is_empty());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("BRAIN_TUMOR".parse::<ClassLabel>().unwrap(), ClassLabel::BrainTumor);
        assert!("brain_tumor".parse::<ClassLabel>().is_err());
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_decode_last_index() {
        let decoded = LabelSet::standard()
            .decode(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0])
            .unwrap();
        assert_eq!(decoded.index, 7);
        assert_eq!(decoded.body_part, "SPINE");
        assert_eq!(decoded.condition, "NORMAL");
        assert_eq!(decoded.confidence, 1.0);
    }

    #[test]
    fn test_decode_width_mismatch() {
        let err = LabelSet::standard().decode(&[0.2, 0.3, 0.5]).unwrap_err();
        assert!(matches!(err, ClassifierError::IndexOutOfRange { len: 8, .. }));

        let err = LabelSet::standard().decode(&[0.0; 9]).unwrap_err();
        assert!(matches!(err, ClassifierError::IndexOutOfRange { .. }));
    }

    #[test]
    fn test_decode_malformed_persisted_label() {
        let labels = LabelSet::new(vec!["CHEST".to_string(), "SPINE_NORMAL".to_string()]);
        let err = labels.decode(&[0.9, 0.1]).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedLabel(_)));
        assert_eq!(labels.unknown_labels(), vec!["CHEST"]);
    }
}
