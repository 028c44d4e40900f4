//! Checksum algorithms and the `Upload-Checksum` header value.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

/// Checksum algorithms the server knows how to compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Every implemented algorithm.
    pub const ALL: [ChecksumAlgorithm; 3] = [Self::Sha1, Self::Sha256, Self::Sha512];

    /// Parse a protocol algorithm name. Names are case-insensitive.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(Error::UnsupportedAlgorithm(name.to_string())),
        }
    }

    /// Protocol name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the raw digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Create an incremental hasher.
    pub fn hasher(&self) -> ChecksumHasher {
        match self {
            Self::Sha1 => ChecksumHasher::Sha1(Sha1::new()),
            Self::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            Self::Sha512 => ChecksumHasher::Sha512(Sha512::new()),
        }
    }

    /// Compute the digest of data in one call.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum ChecksumHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ChecksumHasher {
    /// Update with more data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the raw digest.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// A parsed `Upload-Checksum` header: `<algorithm> <base64 digest>`.
///
/// The algorithm name is kept as sent, so that an unknown algorithm can be
/// reported by the verifier rather than failing header decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadChecksum {
    pub algorithm: String,
    pub digest: String,
}

impl UploadChecksum {
    /// Parse a header value.
    pub fn parse(header: &str) -> Result<Self> {
        let mut parts = header.split(' ').filter(|s| !s.is_empty());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(algorithm), Some(digest), None) => Ok(Self {
                algorithm: algorithm.to_string(),
                digest: digest.to_string(),
            }),
            _ => Err(Error::InvalidChecksum(format!(
                "expected '<algorithm> <digest>', got {header:?}"
            ))),
        }
    }

    /// Decode the base64 digest.
    pub fn decoded_digest(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.digest)
            .map_err(|e| Error::InvalidChecksum(format!("digest is not base64: {e}")))
    }
}
