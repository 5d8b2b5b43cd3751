//! モデルメタデータの定義
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 推論側はここに記録されたクラス順序と前処理パラメータをそのまま使用します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::labels::LabelSet;
use crate::ml::preprocess::PreprocessConfig;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラスラベル（クラスID順）
    /// 学習データのサブディレクトリ名から決定される
    /// 例: ["BONE_FRACTURE", "BONE_NORMAL", "BRAIN_NORMAL", ...]
    pub class_labels: Vec<String>,

    /// 学習・推論で共通の前処理パラメータ
    pub preprocess: PreprocessConfig,

    /// 全結合隠れ層のユニット数
    pub hidden_units: usize,

    /// 学習エポック数
    pub num_epochs: u32,

    /// バッチサイズ
    pub batch_size: u32,

    /// 学習率
    pub learning_rate: f64,

    /// 学習サンプル数
    #[serde(default)]
    pub num_samples: u64,

    /// 最終エポックの学習精度 (0.0-1.0)
    #[serde(default)]
    pub final_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        preprocess: PreprocessConfig,
        hidden_units: usize,
        num_epochs: u32,
        batch_size: u32,
        learning_rate: f64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            preprocess,
            hidden_units,
            num_epochs,
            batch_size,
            learning_rate,
            num_samples: 0,
            final_accuracy: None,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// 推論用のラベル一覧
    pub fn label_set(&self) -> LabelSet {
        LabelSet::new(self.class_labels.clone())
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
