//! モデル推論機能

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::error::{ClassifierError, Result};
use crate::ml::classifier::{Classifier, ProbabilityModel};
use crate::ml::{MedicalClassifier, ModelConfig};
use crate::ml::preprocess::{PreprocessConfig, PreprocessedTensor};
use crate::model::{load_model_with_metadata, ModelMetadata};

/// 推論エンジン
///
/// 読み込み後は変更されません。
pub struct InferenceEngine<B: Backend> {
    model: MedicalClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
    path: PathBuf,
}

impl<B: Backend> InferenceEngine<B> {
    /// アーティファクトを読み込んで推論エンジンを初期化
    ///
    /// ファイルの欠損・破損・重みとアーキテクチャの不一致・クラス数の不一致は
    /// すべて `ArtifactLoad` になります。
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let path = model_path.as_ref();

        let (metadata, model_binary) = load_model_with_metadata(path)
            .map_err(|e| ClassifierError::artifact(path, format!("{:#}", e)))?;

        if metadata.class_labels.is_empty() {
            return Err(ClassifierError::artifact(path, "クラスラベルが空です"));
        }
        metadata
            .preprocess
            .validate()
            .map_err(|reason| ClassifierError::artifact(path, reason))?;

        let model_config = ModelConfig::new(metadata.num_classes())
            .with_image_size(metadata.preprocess.image_size as usize)
            .with_hidden_units(metadata.hidden_units);
        let model = model_config.init::<B>(device);

        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, device)
            .map_err(|e| ClassifierError::artifact(path, format!("モデル重みの読み込みエラー: {:?}", e)))?;
        let model = model.load_record(record);

        model
            .check_shapes(&model_config)
            .map_err(|reason| ClassifierError::artifact(path, reason))?;

        let unknown = metadata.label_set().unknown_labels().join(", ");
        if !unknown.is_empty() {
            tracing::warn!("標準クラスに含まれないラベルがあります: {}", unknown);
        }

        tracing::info!(
            path = %path.display(),
            classes = metadata.num_classes(),
            params = model.num_params(),
            trained_at = %metadata.trained_at,
            "モデルを読み込みました"
        );

        Ok(Self {
            model,
            metadata,
            device: device.clone(),
            path: path.to_path_buf(),
        })
    }

    /// アーティファクトのメタデータ
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// 学習時の前処理設定
    pub fn preprocess_config(&self) -> PreprocessConfig {
        self.metadata.preprocess
    }

    /// メタデータのクラス順序と前処理設定で分類器を作成
    pub fn into_classifier(self) -> Result<Classifier<Self>> {
        let labels = self.metadata.label_set();
        let preprocess = self.metadata.preprocess;
        Classifier::new(self, labels, preprocess)
    }
}

impl<B: Backend> ProbabilityModel for InferenceEngine<B> {
    fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    fn predict(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
        let images = Tensor::<B, 1>::from_floats(tensor.as_slice(), &self.device).reshape(tensor.shape());

        self.model
            .forward_probabilities(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::artifact(&self.path, format!("推論結果の取得エラー: {:?}", e)))
    }
}

/// アーティファクトから分類器を読み込む
pub fn load_classifier<B: Backend>(
    model_path: &Path,
    device: &B::Device,
) -> Result<Classifier<InferenceEngine<B>>> {
    InferenceEngine::<B>::load(model_path, device)?.into_classifier()
}
