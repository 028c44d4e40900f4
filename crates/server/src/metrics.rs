//! Prometheus metrics for the Tusk server.
//!
//! The `/metrics` endpoint is unauthenticated. It exposes aggregate counts
//! only (no upload IDs or metadata), but should still be restricted to the
//! scraper's network.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload lifecycle
pub static UPLOADS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tusk_uploads_created_total", "Total number of uploads created")
        .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_uploads_completed_total",
        "Total number of uploads that reached their declared length",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_TERMINATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_uploads_terminated_total",
        "Total number of uploads terminated by clients",
    )
    .expect("metric creation failed")
});

// Chunks
pub static CHUNKS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_chunks_committed_total",
        "Total number of chunks appended to uploads",
    )
    .expect("metric creation failed")
});

pub static BYTES_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_bytes_committed_total",
        "Total bytes appended to uploads",
    )
    .expect("metric creation failed")
});

pub static CHECKSUM_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_checksum_mismatches_total",
        "Total number of chunks rejected for a checksum mismatch",
    )
    .expect("metric creation failed")
});

pub static OFFSET_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tusk_offset_conflicts_total",
        "Total number of chunks rejected for a stale offset or a lost write lock",
    )
    .expect("metric creation failed")
});

pub static CHUNK_COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tusk_chunk_commit_duration_seconds",
            "Time to verify and append a staged chunk",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

pub static REQUEST_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tusk_request_errors_total", "Total protocol errors by code"),
        &["code"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build many routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_TERMINATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHECKSUM_MISMATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OFFSET_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_COMMIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUEST_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a protocol error by its code.
pub fn record_error(code: &str) {
    REQUEST_ERRORS.with_label_values(&[code]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_recorded_errors_are_gathered() {
        register_metrics();
        record_error("conflict");
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("tusk_request_errors_total{code=\"conflict\"}"));
    }
}
