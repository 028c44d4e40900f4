//! Health check endpoint.

use crate::error::{TusError, TusResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage_backend: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> TusResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state
        .tus
        .store()
        .health_check()
        .await
        .map_err(|e| TusError::Internal(format!("byte store unavailable: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage_backend: state.tus.store().backend_name(),
    }))
}
