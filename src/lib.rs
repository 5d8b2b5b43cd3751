//! 医用画像の部位・状態分類
//!
//! - `ml`: 前処理・ラベル復元・CNN・推論・学習
//! - `model`: アーティファクト（tar.gz）と設定ファイル
//! - `storage`: アップロード画像の保存（ベストエフォート）
//! - `service`: 分類と保存をまとめた1リクエスト分の処理

pub mod error;
pub mod ml;
pub mod model;
pub mod service;
pub mod storage;
pub mod utils;

pub use error::{ClassifierError, Result};
pub use service::{ClassificationReport, ClassificationService};
