//! In-memory metadata store.
//!
//! Every operation runs under one lock, which makes the conditional
//! operations trivially atomic. Records are lost on restart.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{DeleteOutcome, Transition, UploadRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tusk_core::{Upload, UploadId, UploadState};

/// Process-local upload records.
#[derive(Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<UploadId, Upload>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}

#[async_trait]
impl UploadRepo for MemoryStore {
    async fn create_upload(&self, upload: &Upload) -> MetadataResult<()> {
        let mut uploads = self.uploads.lock().await;
        if uploads.contains_key(&upload.id()) {
            return Err(MetadataError::AlreadyExists(format!(
                "upload {} already exists",
                upload.id()
            )));
        }
        uploads.insert(upload.id(), upload.clone());
        Ok(())
    }

    async fn get_upload(&self, id: UploadId) -> MetadataResult<Option<Upload>> {
        Ok(self.uploads.lock().await.get(&id).cloned())
    }

    async fn save_upload(&self, upload: &Upload, expected: UploadState) -> MetadataResult<bool> {
        let mut uploads = self.uploads.lock().await;
        match uploads.get_mut(&upload.id()) {
            Some(stored) if stored.state() == expected => {
                *stored = upload.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_saving(
        &self,
        id: UploadId,
        expected_offset: u64,
    ) -> MetadataResult<Transition> {
        let mut uploads = self.uploads.lock().await;
        let Some(stored) = uploads.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };
        if stored.upload_offset() != expected_offset || stored.begin_saving().is_err() {
            return Ok(Transition::Conflict(stored.clone()));
        }
        Ok(Transition::Applied(stored.clone()))
    }

    async fn begin_receiving(&self, id: UploadId, temp_file: &str) -> MetadataResult<Transition> {
        let mut uploads = self.uploads.lock().await;
        let Some(stored) = uploads.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };
        if stored.begin_receiving(temp_file).is_err() {
            return Ok(Transition::Conflict(stored.clone()));
        }
        Ok(Transition::Applied(stored.clone()))
    }

    async fn declare_length(
        &self,
        id: UploadId,
        expected_offset: u64,
        length: u64,
    ) -> MetadataResult<Transition> {
        let mut uploads = self.uploads.lock().await;
        let Some(stored) = uploads.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };
        let open = matches!(stored.state(), UploadState::Initial | UploadState::Receiving);
        if !open
            || stored.upload_offset() != expected_offset
            || !stored.is_length_deferred()
            || stored.declare_length(length).is_err()
        {
            return Ok(Transition::Conflict(stored.clone()));
        }
        Ok(Transition::Applied(stored.clone()))
    }

    async fn delete_unless_saving(&self, id: UploadId) -> MetadataResult<DeleteOutcome> {
        let mut uploads = self.uploads.lock().await;
        match uploads.get(&id) {
            None => Ok(DeleteOutcome::NotFound),
            Some(stored) if stored.state() == UploadState::Saving => {
                Ok(DeleteOutcome::Busy(stored.clone()))
            }
            Some(_) => Ok(uploads
                .remove(&id)
                .map_or(DeleteOutcome::NotFound, DeleteOutcome::Deleted)),
        }
    }

    async fn delete_upload(&self, id: UploadId) -> MetadataResult<bool> {
        Ok(self.uploads.lock().await.remove(&id).is_some())
    }

    async fn release_saving(&self) -> MetadataResult<u64> {
        let mut uploads = self.uploads.lock().await;
        let mut released = 0;
        for upload in uploads.values_mut() {
            if upload.abort_saving().is_ok() {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn count_uploads(&self, state: UploadState) -> MetadataResult<u64> {
        let uploads = self.uploads.lock().await;
        Ok(uploads.values().filter(|u| u.state() == state).count() as u64)
    }
}
