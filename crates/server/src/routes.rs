//! Route configuration.

use crate::decode;
use crate::error::{TusError, TusResult};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use tower::Layer;
use tower::util::MapRequestLayer;
use tower_http::trace::TraceLayer;
use tusk_core::protocol::TUS_VERSION;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let base = state.config.server.base_path.clone();
    let upload = format!("{base}/{{upload_id}}");

    // Protocol middleware runs after method dispatch, so it sees the
    // overridden method.
    let tus_routes = Router::new()
        .route(&base, post(handlers::create_upload).options(handlers::options))
        .route(
            &upload,
            head(handlers::head_upload)
                .patch(handlers::patch_upload)
                .delete(handlers::terminate_upload)
                .options(handlers::options),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            protocol_middleware,
        ))
        .with_state(state.clone());

    // Method override must rewrite the request before the router picks a
    // method handler.
    let tus_service = MapRequestLayer::new(apply_method_override).layer(tus_routes);

    let mut router = Router::new().route("/health", get(handlers::health_check));

    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback_service(tus_service)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Enforce the protocol version and attach the protocol headers to every
/// upload response, errors included.
async fn protocol_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let checked = if req.method() == Method::OPTIONS {
        Ok(())
    } else {
        check_version(req.headers())
    };

    let mut response = match checked {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    };

    let headers = response.headers_mut();
    for (name, value) in state.tus.protocol_headers() {
        headers.insert(name, value.clone());
    }
    response
}

fn check_version(headers: &HeaderMap) -> TusResult<()> {
    match decode::tus_resumable(headers)? {
        Some(TUS_VERSION) => Ok(()),
        Some(other) => Err(TusError::PreconditionFailed(other.to_string())),
        None => Err(TusError::PreconditionFailed(
            "missing Tus-Resumable header".to_string(),
        )),
    }
}

/// Apply `X-HTTP-Method-Override` to POST requests from clients that cannot
/// send PATCH or DELETE.
fn apply_method_override(mut req: Request) -> Request {
    if req.method() != Method::POST {
        return req;
    }
    let method = decode::method_override(req.headers())
        .ok()
        .flatten()
        .and_then(|value| Method::from_bytes(value.to_ascii_uppercase().as_bytes()).ok());

    if let Some(method) = method {
        tracing::debug!(%method, "applying method override");
        *req.method_mut() = method;
    }
    req
}
