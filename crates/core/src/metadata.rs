//! Upload metadata and its `Upload-Metadata` header encoding.
//!
//! The header is a comma-separated list of `key base64value` pairs. A pair
//! may omit the value, which decodes to an empty string.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value metadata supplied by the client at creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadMetadata(BTreeMap<String, String>);

impl UploadMetadata {
    /// Decode an `Upload-Metadata` header value.
    pub fn decode(header: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let mut parts = pair.split(' ').filter(|s| !s.is_empty());
            let key = parts
                .next()
                .ok_or_else(|| Error::InvalidMetadata(format!("empty pair in {header:?}")))?;
            let value = match parts.next() {
                Some(encoded) => {
                    let raw = STANDARD.decode(encoded).map_err(|e| {
                        Error::InvalidMetadata(format!("value for {key:?} is not base64: {e}"))
                    })?;
                    String::from_utf8(raw).map_err(|_| {
                        Error::InvalidMetadata(format!("value for {key:?} is not UTF-8"))
                    })?
                }
                None => String::new(),
            };
            if parts.next().is_some() {
                return Err(Error::InvalidMetadata(format!(
                    "pair for {key:?} has more than two elements"
                )));
            }

            if entries.insert(key.to_string(), value).is_some() {
                return Err(Error::InvalidMetadata(format!("duplicate key {key:?}")));
            }
        }

        Ok(Self(entries))
    }

    /// Encode as an `Upload-Metadata` header value.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key} {}", STANDARD.encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Insert an entry. Keys must be non-empty and free of spaces and commas.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key.is_empty() || key.contains([' ', ',']) {
            return Err(Error::InvalidMetadata(format!("invalid key {key:?}")));
        }
        self.0.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The `filename` entry, if present.
    pub fn filename(&self) -> Option<&str> {
        self.get("filename")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
