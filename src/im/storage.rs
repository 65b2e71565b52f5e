//! Binary object storage for avatars and message attachments
//!
//! Paths are namespaced by owner: `avatars/<user_id>/...` for profile pictures,
//! `attachments/<conversation_id>/...` for files sent in a conversation. The
//! store itself performs no authorization; services check ownership before
//! building a path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::im::error::{ChatError, Result};

/// Reference to a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Store-relative path, used for deletion
    pub path: String,
    /// Public URL handed to clients
    pub url: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`, overwriting any previous object
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<MediaRef>;

    /// Remove the object at `path`; missing objects are not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Map a public URL produced by this store back to its path
    fn path_for_url(&self, url: &str) -> Option<String>;
}

/// Replace anything that is not a safe filename character.
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn avatar_path(user_id: &str, filename: &str) -> String {
    format!(
        "avatars/{}/{}-{}",
        sanitize_segment(user_id),
        uuid::Uuid::new_v4().simple(),
        sanitize_segment(filename)
    )
}

pub fn attachment_path(conversation_id: &str, filename: &str) -> String {
    format!(
        "attachments/{}/{}-{}",
        sanitize_segment(conversation_id),
        uuid::Uuid::new_v4().simple(),
        sanitize_segment(filename)
    )
}

/// Filesystem-backed store rooted at a directory
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(ChatError::Validation(format!("invalid object path: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<MediaRef> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        info!("[Storage] stored {} ({} bytes)", path, bytes.len());
        Ok(MediaRef {
            path: path.to_string(),
            url: format!("{}/{}", self.base_url, path),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!("[Storage] deleted {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|p| !p.is_empty())
    }
}
