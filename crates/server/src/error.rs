//! Protocol error types and their HTTP mapping.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tusk_core::protocol::{TUS_VERSION, headers};
use tusk_metadata::MetadataError;
use tusk_storage::StorageError;

/// Status sent when an `Upload-Checksum` does not match the chunk.
pub const CHECKSUM_MISMATCH_STATUS: u16 = 460;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Protocol error type.
#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error("bad request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported protocol version: {0}")]
    PreconditionFailed(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("{algorithm} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("chunk transfer failed: {0}")]
    Io(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TusError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PreconditionFailed(_) => "unsupported_version",
            Self::TooLarge(_) => "too_large",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Io(_) => "io_failure",
            Self::Metadata(_) => "metadata_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChecksumMismatch { .. } => StatusCode::from_u16(CHECKSUM_MISMATCH_STATUS)
                .unwrap_or(StatusCode::BAD_REQUEST),
            Self::UnsupportedAlgorithm(_) => StatusCode::BAD_REQUEST,
            Self::Io(_) => StatusCode::BAD_REQUEST,
            Self::Metadata(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tusk_core::Error> for TusError {
    fn from(e: tusk_core::Error) -> Self {
        use tusk_core::Error;
        match e {
            Error::InvalidUploadId(_) => Self::NotFound(e.to_string()),
            Error::IllegalState { .. } | Error::Conflict { .. } => Self::Conflict(e.to_string()),
            Error::InvalidLength(_) | Error::InvalidMetadata(_) | Error::InvalidChecksum(_) => {
                Self::Validation(e.to_string())
            }
            Error::UnsupportedAlgorithm(name) => Self::UnsupportedAlgorithm(name),
            Error::Config(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for TusError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TooLarge { .. } => Self::TooLarge(e.to_string()),
            StorageError::UnsupportedAlgorithm(name) => Self::UnsupportedAlgorithm(name),
            StorageError::InvalidChecksum(_) => Self::Validation(e.to_string()),
            StorageError::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            } => Self::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            },
            StorageError::Body(_) | StorageError::Io(_) => Self::Io(e.to_string()),
            StorageError::Upload(inner) => inner.into(),
            StorageError::NotFound(_)
            | StorageError::AlreadyExists(_)
            | StorageError::InvalidKey(_)
            | StorageError::LengthMismatch { .. }
            | StorageError::Config(_) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for TusError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        crate::metrics::record_error(self.code());
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();

        match self {
            Self::NotFound(_) => {
                response
                    .headers_mut()
                    .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            }
            Self::PreconditionFailed(_) => {
                response
                    .headers_mut()
                    .insert(headers::TUS_VERSION, HeaderValue::from_static(TUS_VERSION));
            }
            _ => {}
        }
        response
    }
}

/// Result type for protocol operations.
pub type TusResult<T> = std::result::Result<T, TusError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tusk_core::UploadState;

    #[test]
    fn test_checksum_mismatch_is_460() {
        let err = TusError::from(StorageError::ChecksumMismatch {
            algorithm: "sha1",
            expected: "a".to_string(),
            actual: "b".to_string(),
        });
        assert_eq!(err.status_code().as_u16(), 460);
        assert_eq!(err.code(), "checksum_mismatch");
    }

    #[test]
    fn test_storage_error_mapping() {
        let too_large = TusError::from(StorageError::TooLarge { limit: 10 });
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let body = TusError::from(StorageError::Body("connection reset".to_string()));
        assert_eq!(body.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(body.code(), "io_failure");

        let md5 = TusError::from(StorageError::UnsupportedAlgorithm("md5".to_string()));
        assert_eq!(md5.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(md5.code(), "unsupported_algorithm");

        let drift = TusError::from(StorageError::LengthMismatch {
            key: "k".to_string(),
            expected: 4,
            actual: 2,
        });
        assert_eq!(drift.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_core_conflict_maps_to_409() {
        let err = TusError::from(tusk_core::Error::Conflict {
            operation: "terminate",
            state: UploadState::Saving,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_not_found_response_is_not_cached() {
        let response = TusError::NotFound("upload".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn test_precondition_failed_advertises_version() {
        let response = TusError::PreconditionFailed("0.2.2".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(response.headers()[headers::TUS_VERSION], TUS_VERSION);
    }
}
