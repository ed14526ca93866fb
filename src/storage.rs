use std::path::{Component, Path, PathBuf};

use std::sync::Arc;

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;

/// URL prefix under which stored objects are reachable.
pub const PUBLIC_PREFIX: &str = "/uploads/";

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
}

/// Relative URL stored on the user record for an object key.
pub fn public_path(key: &str) -> String {
    format!("{PUBLIC_PREFIX}{key}")
}

/// Inverse of [`public_path`]; `None` for external URLs (OAuth avatars).
pub fn key_from_public_path(path: &str) -> Option<&str> {
    path.strip_prefix(PUBLIC_PREFIX).filter(|k| !k.is_empty())
}

/// Stores objects as files below `root`.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        anyhow::ensure!(
            rel.components().all(|c| matches!(c, Component::Normal(_))),
            "invalid object key {key:?}"
        );
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create dir {}", dir.display()))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

pub fn from_config(cfg: &StorageConfig) -> Arc<dyn StorageClient> {
    Arc::new(LocalStorage::new(cfg.root.clone()))
}
