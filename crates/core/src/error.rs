//! Error types for the core domain.

use crate::upload::UploadState;
use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("cannot {operation} an upload in state {state}")]
    IllegalState {
        operation: &'static str,
        state: UploadState,
    },

    #[error("cannot {operation} an upload in state {state}")]
    Conflict {
        operation: &'static str,
        state: UploadState,
    },

    #[error("invalid upload length: {0}")]
    InvalidLength(String),

    #[error("invalid upload metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
