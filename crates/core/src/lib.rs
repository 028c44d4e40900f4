//! Core domain types and shared logic for the Tusk resumable upload server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers, lifecycle states and the upload record
//! - Upload metadata and its header encoding
//! - Checksum algorithms and checksum header values
//! - TUS protocol constants and date formatting
//! - Configuration

pub mod checksum;
pub mod config;
pub mod error;
pub mod metadata;
pub mod protocol;
pub mod upload;

pub use checksum::{ChecksumAlgorithm, ChecksumHasher, UploadChecksum};
pub use error::{Error, Result};
pub use metadata::UploadMetadata;
pub use upload::{Upload, UploadId, UploadParts, UploadState};

/// Default maximum upload size: 4 GiB
pub const DEFAULT_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default maximum size of a single PATCH body: 64 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;
