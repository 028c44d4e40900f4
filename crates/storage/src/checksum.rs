//! Checksum verification of staged chunks.

use crate::error::{StorageError, StorageResult};
use crate::staging::StagedChunk;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::AsyncReadExt;
use tracing::{instrument, warn};
use tusk_core::{ChecksumAlgorithm, UploadChecksum};

/// Read buffer size when hashing a staged chunk (64 KiB).
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Verifies chunks against client-supplied digests.
///
/// Only the algorithms the verifier was built with are accepted; these are
/// the same ones the server advertises.
#[derive(Clone, Debug)]
pub struct ChecksumVerifier {
    algorithms: Vec<ChecksumAlgorithm>,
}

impl ChecksumVerifier {
    pub fn new(algorithms: Vec<ChecksumAlgorithm>) -> Self {
        Self { algorithms }
    }

    pub fn algorithms(&self) -> &[ChecksumAlgorithm] {
        &self.algorithms
    }

    /// Resolve an algorithm name against the enabled set.
    pub fn resolve(&self, name: &str) -> StorageResult<ChecksumAlgorithm> {
        match ChecksumAlgorithm::parse(name) {
            Ok(algorithm) if self.algorithms.contains(&algorithm) => Ok(algorithm),
            _ => Err(StorageError::UnsupportedAlgorithm(name.to_string())),
        }
    }

    /// Check a staged chunk against the expected digest.
    #[instrument(skip(self, chunk), fields(bytes = chunk.len()))]
    pub async fn verify(&self, checksum: &UploadChecksum, chunk: &StagedChunk) -> StorageResult<()> {
        let algorithm = self.resolve(&checksum.algorithm)?;
        let expected = checksum
            .decoded_digest()
            .map_err(|e| StorageError::InvalidChecksum(e.to_string()))?;
        if expected.len() != algorithm.digest_len() {
            return Err(StorageError::InvalidChecksum(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.digest_len(),
                expected.len()
            )));
        }

        let mut file = chunk.open().await?;
        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let actual = hasher.finalize();

        if actual != expected {
            let actual = STANDARD.encode(&actual);
            warn!(%algorithm, expected = %checksum.digest, %actual, "checksum mismatch");
            return Err(StorageError::ChecksumMismatch {
                algorithm: algorithm.as_str(),
                expected: checksum.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}
