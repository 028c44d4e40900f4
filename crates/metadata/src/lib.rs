//! Upload record persistence for Tusk.
//!
//! This crate provides:
//! - The `UploadRepo` interface, including the atomic `Saving` claim
//! - A SQLite store (sqlx) for durable records
//! - An in-memory store for tests and ephemeral deployments

pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryStore;
pub use repos::{DeleteOutcome, Transition, UploadRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tusk_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Memory => {
            tracing::warn!("using in-memory upload store; records are lost on restart");
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("uploads.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let store = from_config(&MetadataConfig::Memory).await.unwrap();
        store.health_check().await.unwrap();
    }
}
