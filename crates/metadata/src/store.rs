//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::UploadRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes the compare-and-set transactions.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "opened sqlite upload store");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::MetadataError;
    use crate::models::UploadRow;
    use crate::repos::{DeleteOutcome, Transition};
    use tusk_core::{Upload, UploadId, UploadState};

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_upload(&self, upload: &Upload) -> MetadataResult<()> {
            let row = UploadRow::from_upload(upload)?;
            sqlx::query(
                r#"
                INSERT INTO uploads (
                    upload_id, state, upload_length, upload_offset, metadata, filename,
                    temp_file, file, expires_at, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.upload_id)
            .bind(&row.state)
            .bind(row.upload_length)
            .bind(row.upload_offset)
            .bind(&row.metadata)
            .bind(&row.filename)
            .bind(&row.temp_file)
            .bind(&row.file)
            .bind(row.expires_at)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    MetadataError::AlreadyExists(format!("upload {} already exists", upload.id()))
                }
                other => MetadataError::Database(other),
            })?;
            Ok(())
        }

        async fn get_upload(&self, id: UploadId) -> MetadataResult<Option<Upload>> {
            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            row.map(UploadRow::into_upload).transpose()
        }

        async fn save_upload(
            &self,
            upload: &Upload,
            expected: UploadState,
        ) -> MetadataResult<bool> {
            let row = UploadRow::from_upload(upload)?;
            let result = sqlx::query(
                r#"
                UPDATE uploads SET
                    state = ?, upload_length = ?, upload_offset = ?, temp_file = ?, file = ?,
                    updated_at = ?
                WHERE upload_id = ? AND state = ?
                "#,
            )
            .bind(&row.state)
            .bind(row.upload_length)
            .bind(row.upload_offset)
            .bind(&row.temp_file)
            .bind(&row.file)
            .bind(row.updated_at)
            .bind(row.upload_id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn begin_saving(
            &self,
            id: UploadId,
            expected_offset: u64,
        ) -> MetadataResult<Transition> {
            // The write acquires SQLite's exclusive lock, so the read and the
            // conditional update form one compare-and-set.
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                tx.commit().await?;
                return Ok(Transition::NotFound);
            };

            let current = row.into_upload()?;
            let mut upload = current.clone();
            if upload.upload_offset() != expected_offset || upload.begin_saving().is_err() {
                tx.commit().await?;
                return Ok(Transition::Conflict(current));
            }

            let result = sqlx::query(
                "UPDATE uploads SET state = 'saving', updated_at = ? WHERE upload_id = ? AND state = 'receiving' AND upload_offset = ?",
            )
            .bind(upload.updated_at())
            .bind(id.as_uuid())
            .bind(i64::try_from(expected_offset).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(Transition::Conflict(current));
            }
            Ok(Transition::Applied(upload))
        }

        async fn begin_receiving(
            &self,
            id: UploadId,
            temp_file: &str,
        ) -> MetadataResult<Transition> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                tx.commit().await?;
                return Ok(Transition::NotFound);
            };

            let current = row.into_upload()?;
            let mut upload = current.clone();
            if upload.begin_receiving(temp_file).is_err() {
                tx.commit().await?;
                return Ok(Transition::Conflict(current));
            }

            let result = sqlx::query(
                "UPDATE uploads SET state = 'receiving', temp_file = ?, updated_at = ? WHERE upload_id = ? AND state = 'initial'",
            )
            .bind(temp_file)
            .bind(upload.updated_at())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(Transition::Conflict(current));
            }
            Ok(Transition::Applied(upload))
        }

        async fn declare_length(
            &self,
            id: UploadId,
            expected_offset: u64,
            length: u64,
        ) -> MetadataResult<Transition> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                tx.commit().await?;
                return Ok(Transition::NotFound);
            };

            let current = row.into_upload()?;
            let mut upload = current.clone();
            let open = matches!(upload.state(), UploadState::Initial | UploadState::Receiving);
            if !open
                || upload.upload_offset() != expected_offset
                || !upload.is_length_deferred()
                || upload.declare_length(length).is_err()
            {
                tx.commit().await?;
                return Ok(Transition::Conflict(current));
            }

            let length = i64::try_from(length).map_err(|_| MetadataError::Corrupt {
                upload_id: id.to_string(),
                reason: "upload_length out of range".to_string(),
            })?;
            let result = sqlx::query(
                r#"
                UPDATE uploads SET upload_length = ?, updated_at = ?
                WHERE upload_id = ? AND state IN ('initial', 'receiving')
                    AND upload_offset = ? AND upload_length IS NULL
                "#,
            )
            .bind(length)
            .bind(upload.updated_at())
            .bind(id.as_uuid())
            .bind(i64::try_from(expected_offset).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(Transition::Conflict(current));
            }
            Ok(Transition::Applied(upload))
        }

        async fn delete_unless_saving(&self, id: UploadId) -> MetadataResult<DeleteOutcome> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                tx.commit().await?;
                return Ok(DeleteOutcome::NotFound);
            };
            let upload = row.into_upload()?;

            let result =
                sqlx::query("DELETE FROM uploads WHERE upload_id = ? AND state != 'saving'")
                    .bind(id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                return Ok(DeleteOutcome::Busy(upload));
            }
            Ok(DeleteOutcome::Deleted(upload))
        }

        async fn delete_upload(&self, id: UploadId) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM uploads WHERE upload_id = ?")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn release_saving(&self) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE uploads SET state = 'receiving', updated_at = ? WHERE state = 'saving'",
            )
            .bind(time::OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn count_uploads(&self, state: UploadState) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploads WHERE state = ?")
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    upload_id BLOB PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'initial',
    upload_length INTEGER,
    upload_offset INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    filename TEXT NOT NULL DEFAULT '',
    temp_file TEXT,
    file TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (upload_offset >= 0),
    CHECK (upload_length IS NULL OR upload_offset <= upload_length)
);
CREATE INDEX IF NOT EXISTS idx_uploads_state ON uploads(state);
CREATE INDEX IF NOT EXISTS idx_uploads_expires ON uploads(expires_at) WHERE expires_at IS NOT NULL;
"#;
