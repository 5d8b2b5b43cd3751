//! 分類パイプラインのエラー定義
//!
//! 前処理・アーティファクト読み込み・ラベル復元の失敗はすべて呼び出し元へ返します。
//! ストレージ失敗は `storage` 側で握りつぶすため、ここには含めません。

use std::path::PathBuf;

use thiserror::Error;

/// 分類パイプラインのエラー
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// 入力を画像としてデコードできない
    #[error("画像のデコードに失敗しました: {0}")]
    Decode(String),

    /// デコードは成功したがチャンネル構成が扱えない
    #[error("画像フォーマットが不正です: {0}")]
    Format(String),

    /// モデルアーティファクトの読み込み・検証に失敗
    #[error("モデルアーティファクトの読み込みに失敗しました ({path}): {reason}")]
    ArtifactLoad { path: PathBuf, reason: String },

    /// 確率ベクトルの幅とラベル数が一致しない
    #[error("クラスインデックス {index} は範囲外です (ラベル数: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// ラベルに区切り文字がない、または複数ある
    #[error("ラベル '{0}' を部位と状態に分割できません")]
    MalformedLabel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifierError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        ClassifierError::ArtifactLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for ClassifierError {
    fn from(err: image::ImageError) -> Self {
        ClassifierError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
