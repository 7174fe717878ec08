use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use log::warn;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("not_found")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error("other: {0}")]
    Other(String),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, rel_path: &str, bytes: &[u8]) -> Result<(), FileStoreError>;
    async fn load(&self, rel_path: &str) -> Result<(Vec<u8>, String), FileStoreError>;
    async fn delete(&self, rel_path: &str) -> Result<(), FileStoreError>;
}

/// Local-disk store rooted at `QUILL_UPLOAD_DIR` (default `uploads/`).
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new() -> Self {
        let root = std::env::var("QUILL_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into());
        Self { root: PathBuf::from(root) }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rejects anything that could escape the root (absolute paths,
    /// `..` components).
    fn resolve(&self, rel_path: &str) -> Result<PathBuf, FileStoreError> {
        let rel = Path::new(rel_path);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || rel_path.is_empty() {
            return Err(FileStoreError::InvalidPath);
        }
        Ok(self.root.join(rel))
    }
}

impl Default for FsFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn save(&self, rel_path: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let path = self.resolve(rel_path)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FileStoreError::Other(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| FileStoreError::Other(e.to_string()))
    }

    async fn load(&self, rel_path: &str) -> Result<(Vec<u8>, String), FileStoreError> {
        let path = self.resolve(rel_path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| FileStoreError::NotFound)?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, rel_path: &str) -> Result<(), FileStoreError> {
        let path = self.resolve(rel_path)?;
        // missing file counts as deleted
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove '{}': {e}", path.display());
                return Err(FileStoreError::Other(e.to_string()));
            }
        }
        Ok(())
    }
}

pub fn build_file_store() -> Arc<dyn FileStore> {
    Arc::new(FsFileStore::new())
}

/// `photo of me.PNG` -> `photo-of-me-1a2b3c4d.png`. The random suffix keeps
/// repeated uploads of the same file from colliding.
pub fn unique_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "bin".into());
    let slug: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "file" } else { slug };
    let mut buf = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{slug}-{}.{ext}", hex::encode(buf))
}

/// Uploads are sharded into `YYYY/MM/` directories.
pub fn dated_path(filename: &str) -> String {
    let now = Utc::now();
    format!("{:04}/{:02}/{}", now.year(), now.month(), filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_slugged_and_suffixed() {
        let name = unique_filename("My Photo (1).PNG");
        assert!(name.starts_with("my-photo--1-"));
        assert!(name.ends_with(".png"));
        assert_ne!(unique_filename("a.jpg"), unique_filename("a.jpg"));
    }

    #[test]
    fn traversal_paths_are_rejected() {
        let store = FsFileStore::with_root("uploads");
        assert!(matches!(
            store.resolve("../etc/passwd"),
            Err(FileStoreError::InvalidPath)
        ));
        assert!(matches!(
            store.resolve("/etc/passwd"),
            Err(FileStoreError::InvalidPath)
        ));
        assert!(store.resolve("2026/08/a.png").is_ok());
    }
}
