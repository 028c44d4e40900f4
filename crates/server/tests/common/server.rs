//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;
use tusk_core::config::AppConfig;
use tusk_core::{Upload, UploadId};
use tusk_metadata::UploadRepo;
use tusk_server::{AppState, EventBus, create_router};

/// Content type of chunk bodies.
#[allow(dead_code)]
pub const OFFSET_STREAM: &str = "application/offset+octet-stream";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

/// Status, headers and body of a response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    /// Get a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and in-memory records.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path().join("storage"));
        modifier(&mut config);

        let store = tusk_storage::from_config(&config.storage)
            .await
            .expect("Failed to create byte store");
        let stager = tusk_storage::stager_from_config(&config.storage, config.tus.max_chunk_size)
            .await
            .expect("Failed to create chunk stager");
        let metadata = tusk_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create metadata store");

        tusk_server::metrics::register_metrics();
        let state = AppState::new(config, store, metadata, stager, EventBus::default())
            .expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Create an upload. `length` of `None` defers the length.
    pub async fn create(&self, length: Option<u64>, metadata: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(self.base_path())
            .header("Tus-Resumable", "1.0.0");
        builder = match length {
            Some(length) => builder.header("Upload-Length", length.to_string()),
            None => builder.header("Upload-Defer-Length", "1"),
        };
        if let Some(metadata) = metadata {
            builder = builder.header("Upload-Metadata", metadata);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Create an upload and return its location.
    pub async fn create_location(&self, length: Option<u64>) -> String {
        let response = self.create(length, None).await;
        assert_eq!(response.status, StatusCode::CREATED);
        response
            .header("location")
            .expect("location header")
            .to_string()
    }

    /// Send a chunk.
    pub async fn patch(
        &self,
        location: &str,
        offset: u64,
        data: impl Into<Bytes>,
        checksum: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("PATCH")
            .uri(location)
            .header("Tus-Resumable", "1.0.0")
            .header("Upload-Offset", offset.to_string())
            .header("Content-Type", OFFSET_STREAM);
        if let Some(checksum) = checksum {
            builder = builder.header("Upload-Checksum", checksum);
        }
        self.send(builder.body(Body::from(data.into())).unwrap())
            .await
    }

    pub async fn head(&self, location: &str) -> TestResponse {
        let request = Request::builder()
            .method("HEAD")
            .uri(location)
            .header("Tus-Resumable", "1.0.0")
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, location: &str) -> TestResponse {
        let request = Request::builder()
            .method("DELETE")
            .uri(location)
            .header("Tus-Resumable", "1.0.0")
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub fn base_path(&self) -> String {
        self.state.config.server.base_path.clone()
    }

    /// Load the stored record behind a location.
    pub async fn upload(&self, location: &str) -> Option<Upload> {
        let id = UploadId::parse(location.rsplit('/').next().unwrap()).unwrap();
        self.state.metadata.get_upload(id).await.unwrap()
    }

    /// Files currently staged.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.storage_root().join(tusk_storage::STAGING_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn storage_root(&self) -> PathBuf {
        self.temp_dir.path().join("storage")
    }
}
