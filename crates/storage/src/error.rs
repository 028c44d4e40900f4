//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("request body failed: {0}")]
    Body(String),

    #[error("chunk exceeds the maximum of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("{algorithm} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[error("object {key} holds {actual} bytes but {expected} are committed")]
    LengthMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Upload(#[from] tusk_core::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
