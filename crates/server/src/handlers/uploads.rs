//! Upload collection handlers.
//!
//! Thin axum adapters: decode the request into typed headers and hand it to
//! the [`TusHandler`](crate::protocol::TusHandler).

use crate::decode::{CreateRequest, PatchRequest};
use crate::error::TusResult;
use crate::protocol::TusResponse;
use crate::state::AppState;
use axum::extract::{Path, Request, State};

/// OPTIONS {base_path} and {base_path}/{upload_id}
pub async fn options(State(state): State<AppState>) -> TusResponse {
    state.tus.options()
}

/// POST {base_path}
pub async fn create_upload(State(state): State<AppState>, req: Request) -> TusResult<TusResponse> {
    let create = CreateRequest::from_headers(req.headers())?;
    state.tus.create(create).await
}

/// HEAD {base_path}/{upload_id}
pub async fn head_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> TusResult<TusResponse> {
    state.tus.head(&upload_id).await
}

/// PATCH {base_path}/{upload_id}
pub async fn patch_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> TusResult<TusResponse> {
    let patch = PatchRequest::from_headers(req.headers())?;
    let body = req.into_body().into_data_stream();
    state.tus.patch(&upload_id, patch, body).await
}

/// DELETE {base_path}/{upload_id}
pub async fn terminate_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> TusResult<TusResponse> {
    state.tus.terminate(&upload_id).await
}
