//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use tusk_core::{Upload, UploadId, UploadMetadata, UploadParts, UploadState};
use uuid::Uuid;

/// Upload record as stored.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub upload_id: Uuid,
    pub state: String,
    pub upload_length: Option<i64>,
    pub upload_offset: i64,
    /// Metadata entries as a JSON object.
    pub metadata: String,
    pub filename: String,
    pub temp_file: Option<String>,
    pub file: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadRow {
    /// Flatten an upload record into a row.
    pub fn from_upload(upload: &Upload) -> MetadataResult<Self> {
        let parts = upload.to_parts();
        let corrupt = |reason: String| MetadataError::Corrupt {
            upload_id: parts.id.to_string(),
            reason,
        };

        let upload_length = parts
            .upload_length
            .map(i64::try_from)
            .transpose()
            .map_err(|_| corrupt("upload_length out of range".to_string()))?;
        let upload_offset = i64::try_from(parts.upload_offset)
            .map_err(|_| corrupt("upload_offset out of range".to_string()))?;

        Ok(Self {
            upload_id: *parts.id.as_uuid(),
            state: parts.state.as_str().to_string(),
            upload_length,
            upload_offset,
            metadata: serde_json::to_string(&parts.metadata)?,
            filename: parts.filename,
            temp_file: parts.temp_file,
            file: parts.file,
            expires_at: parts.expires_at,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        })
    }

    /// Rebuild the upload record.
    pub fn into_upload(self) -> MetadataResult<Upload> {
        let upload_id = self.upload_id.to_string();
        let corrupt = |reason: String| MetadataError::Corrupt {
            upload_id: upload_id.clone(),
            reason,
        };

        let state = UploadState::parse(&self.state)
            .ok_or_else(|| corrupt(format!("unknown state {:?}", self.state)))?;
        let upload_length = self
            .upload_length
            .map(u64::try_from)
            .transpose()
            .map_err(|_| corrupt("negative upload_length".to_string()))?;
        let upload_offset = u64::try_from(self.upload_offset)
            .map_err(|_| corrupt("negative upload_offset".to_string()))?;
        let metadata: UploadMetadata = serde_json::from_str(&self.metadata)?;

        Ok(Upload::from_parts(UploadParts {
            id: UploadId::from_uuid(self.upload_id),
            state,
            upload_length,
            upload_offset,
            metadata,
            filename: self.filename,
            temp_file: self.temp_file,
            file: self.file,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })?)
    }
}
