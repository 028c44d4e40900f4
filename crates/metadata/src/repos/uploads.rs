//! Upload record repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use tusk_core::{Upload, UploadId, UploadState};

/// Outcome of a compare-and-set on a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The guard held and the change was stored. Holds the updated record.
    Applied(Upload),
    /// The guard failed. Holds the current record unchanged.
    Conflict(Upload),
    NotFound,
}

/// Outcome of a conditional delete.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The record was removed. Holds the record as it was.
    Deleted(Upload),
    /// The record is `Saving` and was kept.
    Busy(Upload),
    NotFound,
}

/// Repository for upload records.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Insert a new upload record.
    async fn create_upload(&self, upload: &Upload) -> MetadataResult<()>;

    /// Get an upload record by ID.
    async fn get_upload(&self, id: UploadId) -> MetadataResult<Option<Upload>>;

    /// Overwrite a record, but only if its stored state is still `expected`.
    ///
    /// Only the holder of the `Saving` lock may write a whole record this
    /// way; other changes go through the dedicated transitions below.
    /// Returns `false` if the record is missing or its state moved on.
    async fn save_upload(&self, upload: &Upload, expected: UploadState) -> MetadataResult<bool>;

    /// Atomically move a record from `Receiving` at `expected_offset` to
    /// `Saving`. At most one caller can win for a given record.
    async fn begin_saving(&self, id: UploadId, expected_offset: u64)
    -> MetadataResult<Transition>;

    /// Atomically move a record from `Initial` to `Receiving`, handing it the
    /// byte store object under `temp_file`.
    async fn begin_receiving(&self, id: UploadId, temp_file: &str)
    -> MetadataResult<Transition>;

    /// Atomically set a deferred length.
    ///
    /// Applies only while the record is `Initial` or `Receiving` at
    /// `expected_offset` with no length yet. A `Saving` record conflicts,
    /// since its writer persists the whole record when the commit ends.
    async fn declare_length(
        &self,
        id: UploadId,
        expected_offset: u64,
        length: u64,
    ) -> MetadataResult<Transition>;

    /// Atomically delete a record unless it is `Saving`.
    async fn delete_unless_saving(&self, id: UploadId) -> MetadataResult<DeleteOutcome>;

    /// Delete a record unconditionally. Returns whether it existed.
    async fn delete_upload(&self, id: UploadId) -> MetadataResult<bool>;

    /// Return every `Saving` record to `Receiving` without moving its offset.
    ///
    /// Only safe before requests are served: a crash mid-append leaves the
    /// write lock held with nobody to release it.
    async fn release_saving(&self) -> MetadataResult<u64>;

    /// Count records in a state.
    async fn count_uploads(&self, state: UploadState) -> MetadataResult<u64>;
}
