//! Chunk staging.
//!
//! A request body is drained into a private temp file before anything touches
//! the upload's byte store. The returned [`StagedChunk`] owns that file and
//! removes it when dropped, so a chunk that is rejected or fails halfway
//! never outlives the request.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Writes incoming chunks to a staging directory.
#[derive(Clone, Debug)]
pub struct ChunkStager {
    dir: PathBuf,
    max_chunk_size: u64,
}

impl ChunkStager {
    /// Create a stager, creating the staging directory if needed.
    pub async fn new(dir: impl AsRef<Path>, max_chunk_size: u64) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_chunk_size,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Drain a body stream into a new staged chunk.
    ///
    /// Fails with [`StorageError::TooLarge`] once the body passes the chunk
    /// limit, and with [`StorageError::Body`] if the stream errors (for
    /// example when the client disconnects). The temp file is removed on
    /// every failure.
    #[instrument(skip(self, body), fields(backend = "filesystem"))]
    pub async fn stage<S, E>(&self, body: S) -> StorageResult<StagedChunk>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let mut chunk = StagedChunk {
            path: self.dir.join(format!(".tmp.{}", Uuid::new_v4())),
            len: 0,
            armed: true,
        };

        match self.drain(&chunk.path, body).await {
            Ok(len) => {
                chunk.len = len;
                debug!(bytes = len, path = %chunk.path.display(), "chunk staged");
                Ok(chunk)
            }
            Err(err) => {
                if let Err(e) = chunk.discard().await {
                    warn!(error = %e, "failed to remove partial chunk");
                }
                Err(err)
            }
        }
    }

    async fn drain<S, E>(&self, path: &Path, body: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let mut file = fs::File::create(path).await?;
        let mut body = std::pin::pin!(body);
        let mut len = 0u64;

        while let Some(next) = body.next().await {
            let data = next.map_err(|e| StorageError::Body(e.to_string()))?;
            let total = len + data.len() as u64;
            if total > self.max_chunk_size {
                warn!(limit = self.max_chunk_size, "chunk exceeds size limit");
                return Err(StorageError::TooLarge {
                    limit: self.max_chunk_size,
                });
            }
            file.write_all(&data).await?;
            len = total;
        }
        file.flush().await?;
        Ok(len)
    }
}

/// A chunk drained to a temp file, removed when dropped.
#[derive(Debug)]
pub struct StagedChunk {
    path: PathBuf,
    len: u64,
    armed: bool,
}

impl StagedChunk {
    /// Number of bytes actually received.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the staged bytes for reading.
    pub async fn open(&self) -> StorageResult<fs::File> {
        Ok(fs::File::open(&self.path).await?)
    }

    /// Remove the temp file now instead of on drop.
    pub async fn discard(mut self) -> StorageResult<()> {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Reached on cancellation and on paths that never call `discard`. Inside a
/// runtime the unlink runs on the blocking pool.
impl Drop for StagedChunk {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let remove = move || {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove staged chunk");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(parts: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes()))),
        )
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_stage_counts_actual_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();

        let chunk = stager.stage(body(vec!["hello ", "world"])).await.unwrap();
        assert_eq!(chunk.len(), 11);
        assert_eq!(std::fs::read(chunk.path()).unwrap(), b"hello world");
        assert!(
            chunk
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".tmp.")
        );
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();

        let chunk = stager.stage(body(vec!["abc"])).await.unwrap();
        assert_eq!(staged_files(dir.path()), 1);
        drop(chunk);

        for _ in 0..200 {
            if staged_files(dir.path()) == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("staged chunk survived its drop");
    }

    #[test]
    fn test_drop_outside_runtime_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(async {
                let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();
                stager.stage(body(vec!["abc"])).await.unwrap()
            });

        assert_eq!(staged_files(dir.path()), 1);
        drop(chunk);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cancelled_stage_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();

        // A body that never finishes, like a stalled client.
        let stalled = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"part"))])
            .chain(stream::pending());
        let mut staging = Box::pin(stager.stage(stalled));
        for _ in 0..200 {
            assert!(futures::poll!(staging.as_mut()).is_pending());
            if staged_files(dir.path()) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(staged_files(dir.path()), 1);
        drop(staging);

        for _ in 0..200 {
            if staged_files(dir.path()) == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("cancelled stage left its temp file");
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();

        let chunk = stager.stage(body(vec!["abc"])).await.unwrap();
        chunk.discard().await.unwrap();
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_body_error_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 1024).await.unwrap();

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ]);

        match stager.stage(broken).await {
            Err(StorageError::Body(msg)) => assert!(msg.contains("client went away")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 4).await.unwrap();

        assert!(matches!(
            stager.stage(body(vec!["abc", "de"])).await,
            Err(StorageError::TooLarge { limit: 4 })
        ));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ChunkStager::new(dir.path(), 4).await.unwrap();

        let chunk = stager.stage(body(vec![])).await.unwrap();
        assert!(chunk.is_empty());
    }
}
