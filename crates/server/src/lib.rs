//! TUS 1.0.0 resumable upload server.
//!
//! This crate provides:
//! - Typed decoding of protocol request headers
//! - The `TusHandler` protocol state machine (create, head, patch, terminate)
//! - Error to HTTP status mapping
//! - The chunk notification bus
//! - axum routes, protocol header middleware and Prometheus metrics

pub mod decode;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod protocol;
pub mod routes;
pub mod state;

pub use error::{TusError, TusResult};
pub use events::{ChunkReceived, EventBus};
pub use protocol::{TusHandler, TusResponse};
pub use routes::create_router;
pub use state::AppState;
