//! アップロード画像の保存
//!
//! 保存は付随処理のため、失敗しても分類結果の返却を妨げません。
//! `upload_best_effort` はエラーを URL なしの結果に変換し、警告として記録します。
//!
//! オブジェクトキー: `{部位}/{状態}/{uuid}_{元のファイル名}`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// 保存処理のエラー
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("不正なオブジェクトキーです: {0}")]
    InvalidKey(String),

    #[error("URLを生成できません: {0}")]
    Url(String),
}

/// オブジェクトストレージ
pub trait ObjectStore {
    /// `local_path` のファイルを `key` に保存し、外部から参照できるURLを返す
    fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;

    /// `prefix` 配下を一覧できる場所（任意）
    fn browse_url(&self, _prefix: &str) -> Option<String> {
        None
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        (**self).put(local_path, key)
    }

    fn browse_url(&self, prefix: &str) -> Option<String> {
        (**self).browse_url(prefix)
    }
}

/// 保存結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub key: String,
    /// 保存に成功した場合のURL
    pub url: Option<String>,
    /// `{部位}/{状態}/` 配下の一覧URL
    pub browse_url: Option<String>,
    /// 保存に失敗した場合のエラー内容
    pub diagnostic: Option<String>,
}

/// アップロードされたファイル名に一意なプレフィックスを付ける
pub fn unique_file_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    format!("{}_{}", uuid::Uuid::new_v4(), base)
}

/// `{部位}/{状態}/` のキープレフィックス
pub fn key_prefix(body_part: &str, condition: &str) -> String {
    format!("{}/{}/", body_part, condition)
}

/// オブジェクトキーを生成
pub fn object_key(body_part: &str, condition: &str, file_name: &str) -> String {
    format!("{}{}", key_prefix(body_part, condition), file_name)
}

/// 保存を試み、失敗は URL なしの結果に変換する
pub fn upload_best_effort<S: ObjectStore + ?Sized>(
    store: &S,
    local_path: &Path,
    body_part: &str,
    condition: &str,
    file_name: &str,
) -> UploadOutcome {
    let key = object_key(body_part, condition, file_name);
    let browse_url = store.browse_url(&key_prefix(body_part, condition));

    match store.put(local_path, &key) {
        Ok(url) => {
            tracing::info!(key = %key, url = %url, "画像を保存しました");
            UploadOutcome {
                key,
                url: Some(url),
                browse_url,
                diagnostic: None,
            }
        }
        Err(e) => {
            tracing::warn!(key = %key, "画像の保存に失敗しました: {}", e);
            UploadOutcome {
                key,
                url: None,
                browse_url,
                diagnostic: Some(e.to_string()),
            }
        }
    }
}

/// ローカルディレクトリへの保存
pub struct LocalDirectoryStore {
    root: PathBuf,
}

impl LocalDirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn file_url(path: &Path) -> Result<String, StorageError> {
        let absolute = std::path::absolute(path)?;
        Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::Url(absolute.display().to_string()))
    }
}

impl ObjectStore for LocalDirectoryStore {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local_path, &dest)?;
        Self::file_url(&dest)
    }

    fn browse_url(&self, prefix: &str) -> Option<String> {
        let dir = self.resolve(prefix.trim_end_matches('/')).ok()?;
        Self::file_url(&dir).ok()
    }
}
