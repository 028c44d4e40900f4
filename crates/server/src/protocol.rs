//! The upload protocol state machine.
//!
//! [`TusHandler`] owns one method per protocol operation. It is independent
//! of the HTTP framework: the route layer decodes requests into typed
//! structs and turns the returned [`TusResponse`] into a response. Headers
//! common to every response are added by the route middleware from
//! [`TusHandler::protocol_headers`].

use crate::decode::{CreateRequest, PatchRequest};
use crate::error::{TusError, TusResult};
use crate::events::{ChunkReceived, EventBus};
use crate::metrics;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use tusk_core::config::TusConfig;
use tusk_core::protocol::{self, TUS_VERSION, headers};
use tusk_core::{Upload, UploadChecksum, UploadId, UploadState};
use tusk_metadata::{DeleteOutcome, Transition, UploadRepo};
use tusk_storage::{
    AppendEngine, ByteStore, ChecksumVerifier, ChunkStager, StagedChunk, StorageError,
};

/// Allowed request headers advertised to browsers.
const ALLOW_HEADERS: &str = "Authorization, Origin, X-Requested-With, X-Request-ID, \
    X-HTTP-Method-Override, Content-Type, Upload-Length, Upload-Offset, Tus-Resumable, \
    Upload-Metadata, Upload-Defer-Length, Upload-Checksum";

/// Response headers browsers may read.
const EXPOSE_HEADERS: &str = "Upload-Offset, Location, Upload-Length, Tus-Version, \
    Tus-Resumable, Tus-Max-Size, Tus-Extension, Tus-Checksum-Algorithm, Upload-Metadata, \
    Upload-Defer-Length, Upload-Expires";

const ALLOW_METHODS: &str = "POST, HEAD, PATCH, OPTIONS, DELETE";

/// Preflight cache lifetime in seconds.
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Status and headers of a successful protocol operation.
#[derive(Debug)]
pub struct TusResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl TusResponse {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    fn header(mut self, name: &'static str, value: HeaderValue) -> Self {
        self.headers.insert(HeaderName::from_static(name), value);
        self
    }

    fn no_store(mut self) -> Self {
        self.headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        self
    }

    fn expires(self, upload: &Upload) -> TusResult<Self> {
        match upload.expires_at() {
            Some(at) => {
                let value = text(&protocol::format_http_date(at))?;
                Ok(self.header(headers::UPLOAD_EXPIRES, value))
            }
            None => Ok(self),
        }
    }
}

impl IntoResponse for TusResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers).into_response()
    }
}

/// Protocol handler for one upload collection.
pub struct TusHandler {
    config: TusConfig,
    base_path: String,
    repo: Arc<dyn UploadRepo>,
    engine: AppendEngine,
    stager: ChunkStager,
    verifier: ChecksumVerifier,
    events: EventBus,
    protocol_headers: HeaderMap,
}

impl TusHandler {
    /// Build a handler. Fails if the configured checksum algorithms are
    /// unknown.
    pub fn new(
        config: TusConfig,
        base_path: impl Into<String>,
        repo: Arc<dyn UploadRepo>,
        store: Arc<dyn ByteStore>,
        stager: ChunkStager,
        events: EventBus,
    ) -> tusk_core::Result<Self> {
        config.validate()?;
        let verifier = ChecksumVerifier::new(config.algorithms()?);
        let protocol_headers = build_protocol_headers(&config)?;

        Ok(Self {
            config,
            base_path: base_path.into(),
            repo,
            engine: AppendEngine::new(store),
            stager,
            verifier,
            events,
            protocol_headers,
        })
    }

    pub fn config(&self) -> &TusConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ByteStore> {
        self.engine.store()
    }

    /// Headers sent on every response, errors included.
    pub fn protocol_headers(&self) -> &HeaderMap {
        &self.protocol_headers
    }

    /// Capability discovery.
    pub fn options(&self) -> TusResponse {
        TusResponse::new(StatusCode::NO_CONTENT).header(
            "access-control-max-age",
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        )
    }

    /// Create an upload.
    #[instrument(skip_all, fields(upload_length = ?req.upload_length))]
    pub async fn create(&self, req: CreateRequest) -> TusResult<TusResponse> {
        if let Some(length) = req.upload_length
            && length > self.config.max_size
        {
            return Err(TusError::TooLarge(format!(
                "upload length {length} exceeds the maximum of {}",
                self.config.max_size
            )));
        }

        let mut upload = Upload::create(req.upload_length, req.metadata, self.config.expiry());
        let id = upload.id();

        if upload.upload_length() == Some(0) {
            let key = id.to_string();
            self.store().create(&key).await?;
            self.store().finalize(&key).await?;
            upload.complete_if_empty(key);
        }

        if let Err(e) = self.repo.create_upload(&upload).await {
            if let Some(key) = upload.file()
                && let Err(cleanup) = self.store().delete(key).await
            {
                warn!(upload_id = %id, error = %cleanup, "failed to remove empty object");
            }
            return Err(e.into());
        }

        metrics::UPLOADS_CREATED.inc();
        info!(upload_id = %id, filename = upload.filename(), "upload created");

        if upload.state() == UploadState::Done {
            metrics::UPLOADS_COMPLETED.inc();
            self.events.publish(ChunkReceived {
                upload_id: id,
                offset: 0,
                length: Some(0),
                complete: true,
            });
        }

        let location = format!("{}/{}", self.base_path, id);
        TusResponse::new(StatusCode::CREATED)
            .header("location", text(&location)?)
            .expires(&upload)
    }

    /// Report an upload's offset.
    #[instrument(skip(self))]
    pub async fn head(&self, id: &str) -> TusResult<TusResponse> {
        let upload = self.find(id).await?;

        let mut response = TusResponse::new(StatusCode::OK)
            .header(headers::UPLOAD_OFFSET, upload.upload_offset().into())
            .no_store();
        response = match upload.upload_length() {
            Some(length) => response.header(headers::UPLOAD_LENGTH, length.into()),
            None => response.header(headers::UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1")),
        };
        if !upload.metadata().is_empty() {
            let metadata = text(&upload.metadata().encode())?;
            response = response.header(headers::UPLOAD_METADATA, metadata);
        }
        response.expires(&upload)
    }

    /// Append a chunk.
    ///
    /// Checks run cheapest first: nothing is read from `body` until the
    /// offset, content type and checksum algorithm are known to be
    /// acceptable.
    #[instrument(skip(self, req, body), fields(offset = req.upload_offset))]
    pub async fn patch<S, E>(&self, id: &str, req: PatchRequest, body: S) -> TusResult<TusResponse>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let mut upload = self.find(id).await?;

        if req.upload_offset != upload.upload_offset() {
            metrics::OFFSET_CONFLICTS.inc();
            return Err(TusError::Conflict(format!(
                "Upload-Offset {} does not match the current offset {}",
                req.upload_offset,
                upload.upload_offset()
            )));
        }
        if !req.has_offset_content_type() {
            return Err(TusError::Validation(format!(
                "Content-Type must be {}",
                protocol::OFFSET_OCTET_STREAM
            )));
        }
        let checksum = req.checksum()?;
        if let Some(checksum) = &checksum {
            self.verifier.resolve(&checksum.algorithm)?;
        }
        if !upload.state().accepts_chunks() {
            return Err(TusError::Conflict(format!(
                "upload is {} and accepts no chunks",
                upload.state()
            )));
        }

        if let Some(length) = req.upload_length {
            self.declare_length(&mut upload, length).await?;
        }

        let chunk = self.stager.stage(body).await?;
        let mut upload = match self
            .claim(upload, req.upload_offset, checksum.as_ref(), &chunk)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                if let Err(rm) = chunk.discard().await {
                    warn!(upload_id = %id, error = %rm, "failed to remove staged chunk");
                }
                return Err(e);
            }
        };

        let timer = metrics::CHUNK_COMMIT_DURATION.start_timer();
        let claimed = upload.clone();
        let bytes = chunk.len();
        let appended = self.engine.append(&mut upload, chunk).await;
        let persisted = self.repo.save_upload(&upload, UploadState::Saving).await;
        timer.observe_duration();

        let offset = match (appended, persisted) {
            (Ok(offset), Ok(true)) => offset,
            (Err(e), Ok(true)) => return Err(e.into()),
            (appended, persisted) => {
                self.abandon_commit(&claimed).await;
                return Err(match (appended, persisted) {
                    (Err(e), _) => e.into(),
                    (Ok(_), Err(e)) => e.into(),
                    (Ok(_), Ok(_)) => TusError::Internal(format!(
                        "upload {id} left the saving state during a commit"
                    )),
                });
            }
        };

        let complete = upload.state() == UploadState::Done;
        metrics::CHUNKS_COMMITTED.inc();
        metrics::BYTES_COMMITTED.inc_by(bytes);
        if complete {
            metrics::UPLOADS_COMPLETED.inc();
        }
        self.events.publish(ChunkReceived {
            upload_id: upload.id(),
            offset,
            length: upload.upload_length(),
            complete,
        });

        TusResponse::new(StatusCode::NO_CONTENT)
            .header(headers::UPLOAD_OFFSET, offset.into())
            .expires(&upload)
    }

    /// Terminate an upload and delete its bytes.
    #[instrument(skip(self))]
    pub async fn terminate(&self, id: &str) -> TusResult<TusResponse> {
        let upload = self.find(id).await?;
        upload.clone().terminate()?;

        let mut removed = match self.repo.delete_unless_saving(upload.id()).await? {
            DeleteOutcome::Deleted(record) => record,
            DeleteOutcome::Busy(_) => {
                return Err(TusError::Conflict(format!("upload {id} is saving a chunk")));
            }
            DeleteOutcome::NotFound => return Err(TusError::NotFound(format!("upload {id}"))),
        };

        if let Some(key) = removed.terminate()?
            && let Err(e) = self.store().delete(&key).await
        {
            warn!(upload_id = %id, %key, error = %e, "record removed but object deletion failed");
        }

        metrics::UPLOADS_TERMINATED.inc();
        info!(upload_id = %id, "upload terminated");
        Ok(TusResponse::new(StatusCode::NO_CONTENT))
    }

    /// Look up a live upload. Malformed, missing, expired and terminated
    /// uploads are all not found.
    async fn find(&self, id: &str) -> TusResult<Upload> {
        let not_found = || TusError::NotFound(format!("upload {id}"));
        let id = UploadId::parse(id).map_err(|_| not_found())?;
        let upload = self.repo.get_upload(id).await?.ok_or_else(not_found)?;
        if upload.is_expired() || upload.state() == UploadState::Terminated {
            return Err(not_found());
        }
        Ok(upload)
    }

    /// Admit a staged chunk and take the write lock for it.
    ///
    /// Returns the record in `Saving`, as stored.
    async fn claim(
        &self,
        mut upload: Upload,
        offset: u64,
        checksum: Option<&UploadChecksum>,
        chunk: &StagedChunk,
    ) -> TusResult<Upload> {
        upload.check_chunk_fits(chunk.len())?;

        if upload.state() == UploadState::Initial {
            upload = self.begin_receiving(upload).await?;
        }

        if let Some(checksum) = checksum
            && let Err(e) = self.verifier.verify(checksum, chunk).await
        {
            if matches!(e, StorageError::ChecksumMismatch { .. }) {
                metrics::CHECKSUM_MISMATCHES.inc();
            }
            return Err(e.into());
        }

        match self.repo.begin_saving(upload.id(), offset).await? {
            Transition::Applied(claimed) => Ok(claimed),
            Transition::Conflict(current) => {
                metrics::OFFSET_CONFLICTS.inc();
                Err(TusError::Conflict(format!(
                    "upload is {} at offset {}; another request owns it",
                    current.state(),
                    current.upload_offset()
                )))
            }
            Transition::NotFound => Err(TusError::NotFound(format!("upload {}", upload.id()))),
        }
    }

    async fn declare_length(&self, upload: &mut Upload, length: u64) -> TusResult<()> {
        if length > self.config.max_size {
            return Err(TusError::TooLarge(format!(
                "upload length {length} exceeds the maximum of {}",
                self.config.max_size
            )));
        }
        if !upload.is_length_deferred() {
            upload.declare_length(length)?;
            return Ok(());
        }

        // Validate against the snapshot; the store re-checks against the
        // current record.
        upload.clone().declare_length(length)?;
        match self
            .repo
            .declare_length(upload.id(), upload.upload_offset(), length)
            .await?
        {
            Transition::Applied(declared) => *upload = declared,
            Transition::Conflict(current) => {
                return Err(TusError::Conflict(format!(
                    "upload is {} at offset {}; its length cannot be declared at offset {}",
                    current.state(),
                    current.upload_offset(),
                    upload.upload_offset()
                )));
            }
            Transition::NotFound => {
                return Err(TusError::NotFound(format!("upload {}", upload.id())));
            }
        }
        info!(upload_id = %upload.id(), length, "deferred length declared");
        Ok(())
    }

    /// Move an upload to `Receiving` on its first chunk.
    ///
    /// Two first chunks can race here. Exactly one performs the transition;
    /// the loser carries on from the stored record and meets the write lock
    /// next.
    async fn begin_receiving(&self, upload: Upload) -> TusResult<Upload> {
        let key = upload.id().to_string();
        match self.store().create(&key).await {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.repo.begin_receiving(upload.id(), &key).await? {
            Transition::Applied(started) => Ok(started),
            Transition::Conflict(current) if current.state() == UploadState::Receiving => {
                Ok(current)
            }
            Transition::Conflict(current) => Err(TusError::Conflict(format!(
                "upload is {} and accepts no chunks",
                current.state()
            ))),
            Transition::NotFound => Err(TusError::NotFound(format!("upload {}", upload.id()))),
        }
    }

    /// Clean up after a commit whose record update failed.
    ///
    /// `claimed` is the record as the write lock was taken. While the stored
    /// record still matches it, the bytes are rolled back and the lock is
    /// released. Whatever is left behind is repaired by the next append.
    async fn abandon_commit(&self, claimed: &Upload) {
        let id = claimed.id();
        match self.repo.get_upload(id).await {
            Ok(Some(current))
                if current.state() == UploadState::Saving
                    && current.upload_offset() == claimed.upload_offset() => {}
            Ok(_) => {
                warn!(upload_id = %id, "record moved on during a failed commit");
                return;
            }
            Err(e) => {
                error!(upload_id = %id, error = %e, "write lock held until restart");
                return;
            }
        }

        if let Err(e) = self.engine.revert(claimed).await {
            warn!(upload_id = %id, error = %e, "rollback deferred to the next append");
        }

        let mut released = claimed.clone();
        let result = match released.abort_saving() {
            Ok(()) => self
                .repo
                .save_upload(&released, UploadState::Saving)
                .await
                .map_err(TusError::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(true) => {
                info!(upload_id = %id, offset = claimed.upload_offset(), "write lock released");
            }
            Ok(false) => warn!(upload_id = %id, "write lock already released"),
            Err(e) => error!(upload_id = %id, error = %e, "write lock held until restart"),
        }
    }
}

fn build_protocol_headers(config: &TusConfig) -> tusk_core::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    let mut put = |name: &'static str, value: HeaderValue| {
        map.insert(HeaderName::from_static(name), value);
    };
    let config_value = |value: String| {
        HeaderValue::from_str(&value)
            .map_err(|_| tusk_core::Error::Config(format!("invalid header value {value:?}")))
    };

    put(headers::TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    put(headers::TUS_VERSION, HeaderValue::from_static(TUS_VERSION));
    put(headers::TUS_EXTENSION, config_value(protocol::extensions_header())?);
    put(headers::TUS_MAX_SIZE, config.max_size.into());
    put(
        headers::TUS_CHECKSUM_ALGORITHM,
        config_value(config.checksum_algorithm_header())?,
    );
    put("access-control-allow-origin", HeaderValue::from_static("*"));
    put("access-control-allow-methods", HeaderValue::from_static(ALLOW_METHODS));
    put("access-control-allow-headers", HeaderValue::from_static(ALLOW_HEADERS));
    put("access-control-expose-headers", HeaderValue::from_static(EXPOSE_HEADERS));
    Ok(map)
}

fn text(value: &str) -> TusResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| TusError::Internal(format!("unencodable header value {value:?}")))
}
