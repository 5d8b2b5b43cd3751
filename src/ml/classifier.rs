//! 前処理・推論・ラベル復元をまとめた分類器

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::ml::labels::LabelSet;
use crate::ml::preprocess::{self, PreprocessConfig, PreprocessedTensor};

/// 学習済みモデルの推論インターフェース
///
/// 実装は読み込み後に変更されないこと。
pub trait ProbabilityModel {
    /// 出力クラス数
    fn num_classes(&self) -> usize;

    /// 確率ベクトル（長さ `num_classes()`）を返す
    fn predict(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>>;
}

impl<M: ProbabilityModel + ?Sized> ProbabilityModel for Box<M> {
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn predict(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
        (**self).predict(tensor)
    }
}

/// 分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 予測クラスID
    pub index: usize,
    pub label: String,
    pub body_part: String,
    pub condition: String,
    /// 予測クラスの確率
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

/// 単一画像の分類器
pub struct Classifier<M> {
    model: M,
    labels: LabelSet,
    preprocess: PreprocessConfig,
}

impl<M: ProbabilityModel> Classifier<M> {
    /// モデルとラベル一覧から分類器を作成
    ///
    /// モデルの出力幅とラベル数が異なる場合は `IndexOutOfRange` を返します。
    pub fn new(model: M, labels: LabelSet, preprocess: PreprocessConfig) -> Result<Self> {
        let width = model.num_classes();
        if width != labels.len() {
            return Err(ClassifierError::IndexOutOfRange {
                index: width.saturating_sub(1),
                len: labels.len(),
            });
        }

        Ok(Self {
            model,
            labels,
            preprocess,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    /// 前処理済みテンソルを分類
    pub fn classify_tensor(&self, tensor: &PreprocessedTensor) -> Result<Prediction> {
        let probabilities = self.model.predict(tensor)?;
        let decoded = self.labels.decode(&probabilities)?;

        Ok(Prediction {
            index: decoded.index,
            label: decoded.label,
            body_part: decoded.body_part,
            condition: decoded.condition,
            confidence: decoded.confidence,
            probabilities,
        })
    }

    /// 画像ファイルを分類
    pub fn classify_path(&self, path: &Path) -> Result<Prediction> {
        let tensor = preprocess::preprocess_path(path, &self.preprocess)?;
        self.classify_tensor(&tensor)
    }

    /// エンコード済み画像バイト列を分類
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let tensor = preprocess::preprocess_bytes(bytes, &self.preprocess)?;
        self.classify_tensor(&tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    struct FixedModel(Vec<f32>);

    impl ProbabilityModel for FixedModel {
        fn num_classes(&self) -> usize {
            self.0.len()
        }

        fn predict(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
            assert_eq!(tensor.shape(), [1, 224, 224, 3]);
            Ok(self.0.clone())
        }
    }

    fn white_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 300, Rgb([255, 255, 255])));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_white_image_decodes_to_spine_normal() {
        let mut probs = vec![0.0; 8];
        probs[7] = 1.0;
        let classifier =
            Classifier::new(FixedModel(probs), LabelSet::standard(), PreprocessConfig::default()).unwrap();

        let prediction = classifier.classify_bytes(&white_png()).unwrap();
        assert_eq!(prediction.index, 7);
        assert_eq!(prediction.body_part, "SPINE");
        assert_eq!(prediction.condition, "NORMAL");
    }

    #[test]
    fn test_output_width_must_match_labels() {
        let result = Classifier::new(
            FixedModel(vec![0.5, 0.5, 0.0]),
            LabelSet::standard(),
            PreprocessConfig::default(),
        );
        assert!(matches!(result, Err(ClassifierError::IndexOutOfRange { len: 8, .. })));
    }

    #[test]
    fn test_corrupt_input_never_reaches_model() {
        let classifier = Classifier::new(
            FixedModel(vec![0.125; 8]),
            LabelSet::standard(),
            PreprocessConfig::default(),
        )
        .unwrap();

        let err = classifier.classify_bytes(&[0x00, 0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }
}
