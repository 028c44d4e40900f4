//! Storage trait definitions.

use crate::error::StorageResult;
use crate::staging::StagedChunk;
use async_trait::async_trait;
use bytes::Bytes;

/// Append-only byte storage for upload objects.
///
/// Each object is addressed by a key and lives in one of two places: the
/// in-progress location, which only ever grows by [`append`](Self::append)
/// (or shrinks by an explicit rollback [`truncate`](Self::truncate)), and
/// the completed location it is moved to by [`finalize`](Self::finalize).
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Create an empty in-progress object.
    async fn create(&self, key: &str) -> StorageResult<()>;

    /// Current size of the in-progress object.
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// Append a staged chunk to the in-progress object.
    ///
    /// Returns the number of bytes appended. On error the object may hold a
    /// partial tail which the caller must truncate.
    async fn append(&self, key: &str, chunk: &StagedChunk) -> StorageResult<u64>;

    /// Truncate the in-progress object to `len` bytes.
    async fn truncate(&self, key: &str, len: u64) -> StorageResult<()>;

    /// Move the in-progress object to its completed location.
    async fn finalize(&self, key: &str) -> StorageResult<()>;

    /// Move a completed object back to the in-progress location.
    ///
    /// Undoes a [`finalize`](Self::finalize) whose commit never reached the
    /// record store.
    async fn reopen(&self, key: &str) -> StorageResult<()>;

    /// Read a completed object.
    async fn read(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete an object wherever it lives. Missing objects are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}
