//! Application state shared across handlers.

use crate::events::EventBus;
use crate::protocol::TusHandler;
use std::sync::Arc;
use tusk_core::config::AppConfig;
use tusk_metadata::MetadataStore;
use tusk_storage::{ByteStore, ChunkStager};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload record store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Protocol handler for the upload collection.
    pub tus: Arc<TusHandler>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ByteStore>,
        metadata: Arc<dyn MetadataStore>,
        stager: ChunkStager,
        events: EventBus,
    ) -> tusk_core::Result<Self> {
        let tus = TusHandler::new(
            config.tus.clone(),
            config.server.base_path.clone(),
            metadata.clone(),
            store,
            stager,
            events,
        )?;

        Ok(Self {
            config: Arc::new(config),
            metadata,
            tus: Arc::new(tus),
        })
    }
}
