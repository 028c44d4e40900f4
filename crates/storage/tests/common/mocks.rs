use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tusk_storage::error::{StorageError, StorageResult};
use tusk_storage::{ByteStore, FilesystemByteStore, StagedChunk};

/// Filesystem store that can be told to fail appends halfway through,
/// leaving a torn tail on disk like a crash or a full disk would.
#[allow(dead_code)]
pub struct FlakyByteStore {
    pub inner: FilesystemByteStore,
    pub fail_appends: AtomicBool,
    pub truncations: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FlakyByteStore {
    pub fn new(inner: FilesystemByteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_appends: AtomicBool::new(false),
            truncations: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }

    fn write_torn_tail(&self, key: &str, chunk: &StagedChunk) -> std::io::Result<()> {
        let data = std::fs::read(chunk.path())?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(self.inner.root().join("partial").join(key))?;
        file.write_all(&data[..data.len() / 2])?;
        file.sync_all()
    }
}

#[async_trait]
impl ByteStore for FlakyByteStore {
    async fn create(&self, key: &str) -> StorageResult<()> {
        self.inner.create(key).await
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        self.inner.size(key).await
    }

    async fn append(&self, key: &str, chunk: &StagedChunk) -> StorageResult<u64> {
        if self.fail_appends.load(Ordering::SeqCst) {
            self.write_torn_tail(key, chunk)?;
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.append(key, chunk).await
    }

    async fn truncate(&self, key: &str, len: u64) -> StorageResult<()> {
        self.truncations.fetch_add(1, Ordering::SeqCst);
        self.inner.truncate(key, len).await
    }

    async fn finalize(&self, key: &str) -> StorageResult<()> {
        self.inner.finalize(key).await
    }

    async fn reopen(&self, key: &str) -> StorageResult<()> {
        self.inner.reopen(key).await
    }

    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.read(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
