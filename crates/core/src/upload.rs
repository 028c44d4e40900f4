//! Upload record types and lifecycle.
//!
//! The [`Upload`] record is the single owner of an upload's offset, length
//! and state. Its fields are private: every change goes through one of the
//! transition methods, which enforce the state machine
//!
//! ```text
//! Initial -> Receiving <-> Saving -> Done
//!    \           \                     \
//!     +-----------+-----> Terminated <--+
//! ```
//!
//! Termination is legal from every state except `Saving`.

use crate::metadata::UploadMetadata;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidUploadId(format!("{s}: {e}")))
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Created, no chunk accepted yet.
    Initial,
    /// At least one chunk accepted, waiting for the next one.
    Receiving,
    /// A chunk commit is in flight. Acts as the per-upload write lock.
    Saving,
    /// All declared bytes have been committed.
    Done,
    /// Terminated by the client.
    Terminated,
}

impl UploadState {
    /// Stable string form used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Receiving => "receiving",
            Self::Saving => "saving",
            Self::Done => "done",
            Self::Terminated => "terminated",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(Self::Initial),
            "receiving" => Some(Self::Receiving),
            "saving" => Some(Self::Saving),
            "done" => Some(Self::Done),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether a new chunk may be started in this state.
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, Self::Initial | Self::Receiving)
    }

    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Terminated)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain field view of an [`Upload`], used to persist and restore records.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadParts {
    pub id: UploadId,
    pub state: UploadState,
    /// Declared total length, `None` while deferred.
    pub upload_length: Option<u64>,
    pub upload_offset: u64,
    pub metadata: UploadMetadata,
    pub filename: String,
    /// Byte store key of the in-progress object.
    pub temp_file: Option<String>,
    /// Byte store key of the completed object.
    pub file: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// An upload record.
#[derive(Clone, Debug, PartialEq)]
pub struct Upload {
    id: UploadId,
    state: UploadState,
    upload_length: Option<u64>,
    upload_offset: u64,
    metadata: UploadMetadata,
    filename: String,
    temp_file: Option<String>,
    file: Option<String>,
    expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl Upload {
    /// Create a new upload in the `Initial` state.
    ///
    /// `upload_length` is `None` when the client deferred the length.
    pub fn create(
        upload_length: Option<u64>,
        metadata: UploadMetadata,
        expires_in: Option<time::Duration>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let filename = metadata.get("filename").unwrap_or_default().to_string();
        Self {
            id: UploadId::new(),
            state: UploadState::Initial,
            upload_length,
            upload_offset: 0,
            metadata,
            filename,
            temp_file: None,
            file: None,
            expires_at: expires_in.map(|ttl| now + ttl),
            created_at: now,
            updated_at: now,
        }
    }

    /// Restore a record from persisted parts.
    pub fn from_parts(parts: UploadParts) -> Result<Self> {
        if let Some(length) = parts.upload_length
            && parts.upload_offset > length
        {
            return Err(Error::InvalidLength(format!(
                "offset {} exceeds length {} for upload {}",
                parts.upload_offset, length, parts.id
            )));
        }

        Ok(Self {
            id: parts.id,
            state: parts.state,
            upload_length: parts.upload_length,
            upload_offset: parts.upload_offset,
            metadata: parts.metadata,
            filename: parts.filename,
            temp_file: parts.temp_file,
            file: parts.file,
            expires_at: parts.expires_at,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        })
    }

    /// Copy the record into its plain field view.
    pub fn to_parts(&self) -> UploadParts {
        UploadParts {
            id: self.id,
            state: self.state,
            upload_length: self.upload_length,
            upload_offset: self.upload_offset,
            metadata: self.metadata.clone(),
            filename: self.filename.clone(),
            temp_file: self.temp_file.clone(),
            file: self.file.clone(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Declared length, `None` while deferred.
    pub fn upload_length(&self) -> Option<u64> {
        self.upload_length
    }

    /// Number of bytes committed so far.
    pub fn upload_offset(&self) -> u64 {
        self.upload_offset
    }

    pub fn metadata(&self) -> &UploadMetadata {
        &self.metadata
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Byte store key of the in-progress object, held while receiving.
    pub fn temp_file(&self) -> Option<&str> {
        self.temp_file.as_deref()
    }

    /// Byte store key of the completed object.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    /// Whether the length is still unknown.
    pub fn is_length_deferred(&self) -> bool {
        self.upload_length.is_none()
    }

    /// Whether every declared byte has been committed.
    pub fn is_complete(&self) -> bool {
        self.upload_length == Some(self.upload_offset)
    }

    /// Bytes still expected, if the length is known.
    pub fn remaining(&self) -> Option<u64> {
        self.upload_length
            .map(|length| length.saturating_sub(self.upload_offset))
    }

    /// Check if the upload expired at the given instant.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Check if the upload has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Check that a chunk of `bytes` fits within the declared length.
    pub fn check_chunk_fits(&self, bytes: u64) -> Result<u64> {
        let new_offset = self.upload_offset.checked_add(bytes).ok_or_else(|| {
            Error::InvalidLength(format!("offset overflow adding {bytes} bytes"))
        })?;
        if let Some(length) = self.upload_length
            && new_offset > length
        {
            return Err(Error::InvalidLength(format!(
                "chunk of {bytes} bytes at offset {} exceeds declared length {length}",
                self.upload_offset
            )));
        }
        Ok(new_offset)
    }

    /// Declare the length of an upload created with a deferred length.
    ///
    /// Re-declaring the same value is a no-op.
    pub fn declare_length(&mut self, length: u64) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::IllegalState {
                operation: "declare the length of",
                state: self.state,
            });
        }

        match self.upload_length {
            Some(existing) if existing == length => Ok(()),
            Some(existing) => Err(Error::InvalidLength(format!(
                "length already declared as {existing}"
            ))),
            None if length < self.upload_offset => Err(Error::InvalidLength(format!(
                "length {length} is below the current offset {}",
                self.upload_offset
            ))),
            None => {
                self.upload_length = Some(length);
                self.touch();
                Ok(())
            }
        }
    }

    /// Complete a zero-length upload without any chunk, recording `file` as
    /// its (empty) completed object.
    ///
    /// Returns `true` if the upload moved to `Done`.
    pub fn complete_if_empty(&mut self, file: impl Into<String>) -> bool {
        if self.state == UploadState::Initial && self.upload_length == Some(0) {
            self.file = Some(file.into());
            self.transition(UploadState::Done);
            true
        } else {
            false
        }
    }

    /// Take ownership of the in-progress byte store object on the first chunk.
    pub fn begin_receiving(&mut self, temp_file: impl Into<String>) -> Result<()> {
        if self.state != UploadState::Initial {
            return Err(Error::IllegalState {
                operation: "begin receiving",
                state: self.state,
            });
        }
        self.temp_file = Some(temp_file.into());
        self.transition(UploadState::Receiving);
        Ok(())
    }

    /// Claim the per-upload write lock for a chunk commit.
    pub fn begin_saving(&mut self) -> Result<()> {
        if self.state != UploadState::Receiving {
            return Err(Error::Conflict {
                operation: "begin saving",
                state: self.state,
            });
        }
        self.transition(UploadState::Saving);
        Ok(())
    }

    /// Release the write lock after a failed commit. The offset is untouched.
    pub fn abort_saving(&mut self) -> Result<()> {
        if self.state != UploadState::Saving {
            return Err(Error::IllegalState {
                operation: "abort saving",
                state: self.state,
            });
        }
        self.transition(UploadState::Receiving);
        Ok(())
    }

    /// Advance the offset by a committed chunk and release the write lock.
    ///
    /// Moves to `Done` when the offset reaches the declared length, handing
    /// the in-progress object over as the completed file.
    pub fn commit_chunk(&mut self, bytes_written: u64) -> Result<u64> {
        if self.state != UploadState::Saving {
            return Err(Error::IllegalState {
                operation: "commit a chunk to",
                state: self.state,
            });
        }

        let new_offset = self.check_chunk_fits(bytes_written)?;
        self.upload_offset = new_offset;

        if self.is_complete() {
            self.file = self.temp_file.take();
            self.transition(UploadState::Done);
        } else {
            self.transition(UploadState::Receiving);
        }
        Ok(new_offset)
    }

    /// Terminate the upload.
    ///
    /// Returns the byte store key the caller must delete, if any.
    pub fn terminate(&mut self) -> Result<Option<String>> {
        if self.state == UploadState::Saving {
            return Err(Error::Conflict {
                operation: "terminate",
                state: self.state,
            });
        }
        let key = self.temp_file.take().or_else(|| self.file.take());
        self.transition(UploadState::Terminated);
        Ok(key)
    }

    fn transition(&mut self, to: UploadState) {
        self.state = to;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}
