//! Local filesystem byte store.
//!
//! Layout under the root:
//!
//! ```text
//! partial/<key>    in-progress objects, append-only
//! complete/<key>   finalized objects
//! ```

use crate::error::{StorageError, StorageResult};
use crate::staging::StagedChunk;
use crate::traits::ByteStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

const PARTIAL_DIR: &str = "partial";
const COMPLETE_DIR: &str = "complete";

/// Local filesystem byte store.
pub struct FilesystemByteStore {
    root: PathBuf,
}

impl FilesystemByteStore {
    /// Create a new filesystem byte store.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(PARTIAL_DIR)).await?;
        fs::create_dir_all(root.join(COMPLETE_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are single path components; anything that could leave the
    /// object directories is rejected.
    fn validate_key(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        match Path::new(key).components().next() {
            Some(Component::Normal(_)) => Ok(()),
            _ => Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            ))),
        }
    }

    fn partial_path(&self, key: &str) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(PARTIAL_DIR).join(key))
    }

    fn complete_path(&self, key: &str) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(COMPLETE_DIR).join(key))
    }
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

async fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[async_trait]
impl ByteStore for FilesystemByteStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create(&self, key: &str) -> StorageResult<()> {
        let path = self.partial_path(key)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists(key.to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;
        file.sync_all().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.partial_path(key)?;
        let metadata = fs::metadata(&path).await.map_err(not_found(key))?;
        Ok(metadata.len())
    }

    #[instrument(skip(self, chunk), fields(backend = "filesystem", bytes = chunk.len()))]
    async fn append(&self, key: &str, chunk: &StagedChunk) -> StorageResult<u64> {
        let path = self.partial_path(key)?;
        let mut target = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(not_found(key))?;
        let mut source = chunk.open().await?;

        let written = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        // Data must be on disk before the offset that covers it is persisted.
        target.sync_data().await?;

        if written != chunk.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("staged chunk holds {} bytes, copied {written}", chunk.len()),
            )));
        }
        debug!(bytes = written, "chunk appended");
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn truncate(&self, key: &str, len: u64) -> StorageResult<()> {
        let path = self.partial_path(key)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(not_found(key))?;
        file.set_len(len).await?;
        file.sync_all().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn finalize(&self, key: &str) -> StorageResult<()> {
        let from = self.partial_path(key)?;
        let to = self.complete_path(key)?;
        fs::rename(&from, &to).await.map_err(not_found(key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn reopen(&self, key: &str) -> StorageResult<()> {
        let from = self.complete_path(key)?;
        let to = self.partial_path(key)?;
        fs::rename(&from, &to).await.map_err(not_found(key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.complete_path(key)?;
        let data = fs::read(&path).await.map_err(not_found(key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let partial = remove_if_exists(&self.partial_path(key)?).await?;
        let complete = remove_if_exists(&self.complete_path(key)?).await?;
        debug!(partial, complete, "object deleted");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        for dir in [PARTIAL_DIR, COMPLETE_DIR] {
            let path = self.root.join(dir);
            let metadata = fs::metadata(&path).await.map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    e.kind(),
                    format!("storage directory not accessible: {e}"),
                ))
            })?;

            if !metadata.is_dir() {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    format!("storage path is not a directory: {path:?}"),
                )));
            }
        }
        Ok(())
    }
}
