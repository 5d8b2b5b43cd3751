//! アップロード1件の分類処理
//!
//! 分類 → 保存（ベストエフォート）の順で実行します。分類の失敗は呼び出し元へ返し、
//! 保存の失敗は `UploadOutcome` に記録するだけで結果は返却します。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ml::{Classifier, Prediction, ProbabilityModel};
use crate::storage::{unique_file_name, upload_best_effort, ObjectStore, UploadOutcome};

/// 分類と保存の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub prediction: Prediction,
    pub upload: UploadOutcome,
}

impl ClassificationReport {
    pub fn body_part(&self) -> &str {
        &self.prediction.body_part
    }

    pub fn condition(&self) -> &str {
        &self.prediction.condition
    }

    pub fn url(&self) -> Option<&str> {
        self.upload.url.as_deref()
    }
}

/// 分類サービス
pub struct ClassificationService<M, S> {
    classifier: Classifier<M>,
    store: S,
}

impl<M: ProbabilityModel, S: ObjectStore> ClassificationService<M, S> {
    pub fn new(classifier: Classifier<M>, store: S) -> Self {
        Self { classifier, store }
    }

    pub fn classifier(&self) -> &Classifier<M> {
        &self.classifier
    }

    /// アップロード済みの画像ファイルを分類して保存
    ///
    /// `original_name` は保存キーに使う元のファイル名です。
    pub fn handle_upload(&self, image_path: &Path, original_name: &str) -> Result<ClassificationReport> {
        let prediction = self.classifier.classify_path(image_path)?;

        tracing::info!(
            index = prediction.index,
            label = %prediction.label,
            confidence = prediction.confidence,
            "分類しました"
        );

        let file_name = unique_file_name(original_name);
        let upload = upload_best_effort(
            &self.store,
            image_path,
            &prediction.body_part,
            &prediction.condition,
            &file_name,
        );

        Ok(ClassificationReport { prediction, upload })
    }
}
