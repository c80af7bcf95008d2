//! Object storage for media attachments, addressed by relative path
//! (`chat-images/{id}.jpg`). Backed by a local directory; the public URL is
//! the path under a configurable base served by the HTTP layer.

use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub struct DiskStore {
    dir: PathBuf,
    public_base: String,
}

impl DiskStore {
    pub async fn open(dir: PathBuf, public_base: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.into(),
        })
    }

    /// Store `bytes` at `path`, creating parent directories. Returns the
    /// stored path unchanged so callers can thread it through.
    pub async fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, bytes).await?;
        Ok(path.to_string())
    }

    /// Public URL for a stored path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), path)
    }

    /// Delete a stored object. Deleting a missing object is a no-op.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => {
                info!("Deleted media object {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media object {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => fs::metadata(&full).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Reject absolute paths and traversal so a stored path can never
    /// escape the storage directory.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            bail!("invalid media path: {}", path);
        }
        Ok(self.dir.join(rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().to_path_buf(), "/storage")
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_exists_delete_cycle() {
        let (_dir, store) = store().await;
        let path = store.put("chat-images/a.jpg", b"bytes").await.unwrap();
        assert!(store.exists(&path).await);

        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await);
        // Second delete is a no-op, not an error.
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, store) = store().await;
        assert!(store.put("../escape.jpg", b"x").await.is_err());
        assert!(store.put("/abs.jpg", b"x").await.is_err());
        assert!(!store.exists("../escape.jpg").await);
    }

    #[tokio::test]
    async fn url_joins_base_and_path() {
        let (_dir, store) = store().await;
        assert_eq!(store.url("chat-files/f.pdf"), "/storage/chat-files/f.pdf");
    }
}
