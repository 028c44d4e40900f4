//! Configuration types shared across crates.

use crate::checksum::ChecksumAlgorithm;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tus: TusConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.tus.validate()
    }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:1080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path prefix the upload collection is mounted under.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_base_path() -> String {
    "/files".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_path: default_base_path(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.base_path.starts_with('/') || self.base_path.len() < 2 {
            return Err(Error::Config(format!(
                "base_path must be an absolute path below the root, got {:?}",
                self.base_path
            )));
        }
        if self.base_path.ends_with('/') {
            return Err(Error::Config(format!(
                "base_path must not end with '/', got {:?}",
                self.base_path
            )));
        }
        Ok(())
    }
}

/// Upload protocol policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TusConfig {
    /// Maximum declared upload length in bytes, advertised as `Tus-Max-Size`.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Lifetime of an upload in seconds. Uploads never expire when unset.
    #[serde(default)]
    pub expiry_secs: Option<u64>,
    /// Checksum algorithms advertised and accepted.
    #[serde(default = "default_checksum_algorithms")]
    pub checksum_algorithms: Vec<String>,
    /// Maximum size of a single PATCH body in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
}

fn default_max_size() -> u64 {
    crate::DEFAULT_MAX_SIZE
}

fn default_checksum_algorithms() -> Vec<String> {
    vec!["sha1".to_string()]
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            expiry_secs: None,
            checksum_algorithms: default_checksum_algorithms(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl TusConfig {
    /// Check limits and resolve every configured algorithm.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("max_size must be greater than zero".into()));
        }
        if self.max_chunk_size == 0 {
            return Err(Error::Config(
                "max_chunk_size must be greater than zero".into(),
            ));
        }
        if self.expiry_secs == Some(0) {
            return Err(Error::Config(
                "expiry_secs must be greater than zero when set".into(),
            ));
        }
        self.algorithms().map(|_| ())
    }

    /// Resolve the configured algorithm names, dropping duplicates.
    pub fn algorithms(&self) -> Result<Vec<ChecksumAlgorithm>> {
        let mut resolved = Vec::with_capacity(self.checksum_algorithms.len());
        for name in &self.checksum_algorithms {
            let algorithm = ChecksumAlgorithm::parse(name)
                .map_err(|_| Error::Config(format!("unknown checksum algorithm {name:?}")))?;
            if !resolved.contains(&algorithm) {
                resolved.push(algorithm);
            }
        }
        Ok(resolved)
    }

    /// Get the upload lifetime as a Duration.
    pub fn expiry(&self) -> Option<Duration> {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        self.expiry_secs
            .map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    /// Comma-separated algorithm list for the `Tus-Checksum-Algorithm` header.
    pub fn checksum_algorithm_header(&self) -> String {
        self.algorithms()
            .unwrap_or_default()
            .iter()
            .map(ChecksumAlgorithm::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Byte storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Staged chunks live under the same root.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

/// Upload record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// Process-local records, lost on restart.
    Memory,
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/uploads.db"),
        }
    }
}

impl AppConfig {
    /// Create a configuration rooted in a scratch directory.
    ///
    /// **For testing only.** Uses in-memory records.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            tus: TusConfig::default(),
            storage: StorageConfig::Filesystem { path: root.into() },
            metadata: MetadataConfig::Memory,
        }
    }
}
