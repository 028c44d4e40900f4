//! Append engine: commits staged chunks to an upload's byte store object.

use crate::error::{StorageError, StorageResult};
use crate::staging::StagedChunk;
use crate::traits::ByteStore;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use tusk_core::{Upload, UploadState};

/// Applies staged chunks at the upload's current offset.
///
/// The upload must be in `Saving`. On success the record's offset advances
/// by the staged byte count and the record leaves `Saving`. On failure the
/// object is truncated back to the committed offset and the record returns
/// to `Receiving` with its offset untouched. The staged chunk is consumed
/// and removed either way.
#[derive(Clone)]
pub struct AppendEngine {
    store: Arc<dyn ByteStore>,
}

impl AppendEngine {
    pub fn new(store: Arc<dyn ByteStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Append a staged chunk and advance the record.
    ///
    /// Returns the new offset.
    #[instrument(
        skip(self, upload, chunk),
        fields(upload_id = %upload.id(), offset = upload.upload_offset(), bytes = chunk.len())
    )]
    pub async fn append(&self, upload: &mut Upload, chunk: StagedChunk) -> StorageResult<u64> {
        let result = self.apply(upload, &chunk).await;

        if let Err(e) = chunk.discard().await {
            warn!(error = %e, "failed to remove staged chunk");
        }

        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if upload.state() == UploadState::Saving {
                    upload.abort_saving()?;
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, upload: &mut Upload, chunk: &StagedChunk) -> StorageResult<u64> {
        if upload.state() != UploadState::Saving {
            return Err(tusk_core::Error::IllegalState {
                operation: "append to",
                state: upload.state(),
            }
            .into());
        }

        let key = upload
            .temp_file()
            .ok_or_else(|| StorageError::NotFound(format!("no object for upload {}", upload.id())))?
            .to_string();
        let offset = upload.upload_offset();
        let new_offset = upload.check_chunk_fits(chunk.len())?;

        // A crash between append and persist leaves an uncommitted tail, or
        // an object finalized ahead of its offset.
        let current = match self.store.size(&key).await {
            Err(StorageError::NotFound(_)) => {
                warn!(%key, offset, "reopening object finalized without a committed offset");
                self.store.reopen(&key).await?;
                self.store.size(&key).await?
            }
            other => other?,
        };
        if current > offset {
            warn!(%key, current, offset, "truncating uncommitted tail");
            self.store.truncate(&key, offset).await?;
        } else if current < offset {
            return Err(StorageError::LengthMismatch {
                key,
                expected: offset,
                actual: current,
            });
        }

        if let Err(err) = self.store.append(&key, chunk).await {
            self.rollback(&key, offset).await;
            return Err(err);
        }

        if upload.upload_length() == Some(new_offset)
            && let Err(err) = self.store.finalize(&key).await
        {
            self.rollback(&key, offset).await;
            return Err(err);
        }

        let committed = upload.commit_chunk(chunk.len())?;
        if upload.state() == UploadState::Done {
            info!(upload_id = %upload.id(), length = committed, "upload complete");
        }
        Ok(committed)
    }

    /// Undo an append whose commit never reached the record store.
    ///
    /// `claimed` is the record as it was when the write lock was taken. The
    /// object is reopened if the append finalized it, then cut back to the
    /// claimed offset.
    #[instrument(
        skip(self, claimed),
        fields(upload_id = %claimed.id(), offset = claimed.upload_offset())
    )]
    pub async fn revert(&self, claimed: &Upload) -> StorageResult<()> {
        let key = claimed.temp_file().ok_or_else(|| {
            StorageError::NotFound(format!("no object for upload {}", claimed.id()))
        })?;
        if let Err(StorageError::NotFound(_)) = self.store.size(key).await {
            self.store.reopen(key).await?;
        }
        self.store.truncate(key, claimed.upload_offset()).await
    }

    async fn rollback(&self, key: &str, offset: u64) {
        if let Err(e) = self.store.truncate(key, offset).await {
            error!(%key, offset, error = %e, "failed to roll back partial append");
        }
    }
}
