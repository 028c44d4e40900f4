//! Chunk ingestion and byte storage for Tusk.
//!
//! This crate provides:
//! - Chunk staging to private temp files
//! - Checksum verification of staged chunks
//! - Append-only byte storage with finalization of completed objects
//! - The append engine that commits staged chunks to an upload
//! - Backends: local filesystem

pub mod backends;
pub mod checksum;
pub mod engine;
pub mod error;
pub mod staging;
pub mod traits;

pub use backends::filesystem::FilesystemByteStore;
pub use checksum::ChecksumVerifier;
pub use engine::AppendEngine;
pub use error::{StorageError, StorageResult};
pub use staging::{ChunkStager, StagedChunk};
pub use traits::ByteStore;

use std::sync::Arc;
use tusk_core::config::StorageConfig;

/// Directory under the storage root holding staged chunks.
pub const STAGING_DIR: &str = "staging";

/// Directory under the storage root holding upload objects.
pub const OBJECTS_DIR: &str = "objects";

/// Create a byte store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ByteStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemByteStore::new(path.join(OBJECTS_DIR)).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Create a chunk stager from configuration.
pub async fn stager_from_config(
    config: &StorageConfig,
    max_chunk_size: u64,
) -> StorageResult<ChunkStager> {
    if max_chunk_size == 0 {
        return Err(StorageError::Config(
            "max_chunk_size must be greater than zero".to_string(),
        ));
    }
    match config {
        StorageConfig::Filesystem { path } => {
            ChunkStager::new(path.join(STAGING_DIR), max_chunk_size).await
        }
    }
}
