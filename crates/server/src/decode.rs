//! Typed request headers.
//!
//! Each protocol request is decoded from its raw headers into a struct up
//! front. Values the handler must check in a particular order (content type,
//! checksum) are kept raw and validated by the handler.

use crate::error::{TusError, TusResult};
use axum::http::{HeaderMap, header};
use tusk_core::protocol::{OFFSET_OCTET_STREAM, headers};
use tusk_core::{UploadChecksum, UploadMetadata};

/// Headers of a creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Declared length, `None` when deferred.
    pub upload_length: Option<u64>,
    pub metadata: UploadMetadata,
}

impl CreateRequest {
    pub fn from_headers(map: &HeaderMap) -> TusResult<Self> {
        let upload_length = optional_u64(map, headers::UPLOAD_LENGTH)?;
        let defer = defer_length(map)?;

        match (upload_length, defer) {
            (Some(_), true) => {
                return Err(TusError::Validation(
                    "Upload-Length and Upload-Defer-Length are mutually exclusive".to_string(),
                ));
            }
            (None, false) => {
                return Err(TusError::Validation(
                    "Upload-Length or Upload-Defer-Length: 1 is required".to_string(),
                ));
            }
            _ => {}
        }

        let metadata = match header_str(map, headers::UPLOAD_METADATA)? {
            Some(raw) => UploadMetadata::decode(raw)?,
            None => UploadMetadata::default(),
        };

        Ok(Self {
            upload_length,
            metadata,
        })
    }
}

/// Headers of a chunk request.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub upload_offset: u64,
    /// Length declared for an upload created with a deferred length.
    pub upload_length: Option<u64>,
    pub content_type: Option<String>,
    checksum: Option<String>,
}

impl PatchRequest {
    pub fn from_headers(map: &HeaderMap) -> TusResult<Self> {
        let upload_offset = optional_u64(map, headers::UPLOAD_OFFSET)?
            .ok_or_else(|| TusError::Validation("Upload-Offset is required".to_string()))?;

        Ok(Self {
            upload_offset,
            upload_length: optional_u64(map, headers::UPLOAD_LENGTH)?,
            content_type: header_str(map, header::CONTENT_TYPE.as_str())?.map(str::to_string),
            checksum: header_str(map, headers::UPLOAD_CHECKSUM)?.map(str::to_string),
        })
    }

    /// Whether the body is declared as `application/offset+octet-stream`.
    pub fn has_offset_content_type(&self) -> bool {
        self.content_type.as_deref().is_some_and(|value| {
            let mime = value.split(';').next().unwrap_or_default();
            mime.trim().eq_ignore_ascii_case(OFFSET_OCTET_STREAM)
        })
    }

    /// Parse the `Upload-Checksum` header, if any.
    pub fn checksum(&self) -> TusResult<Option<UploadChecksum>> {
        self.checksum
            .as_deref()
            .map(UploadChecksum::parse)
            .transpose()
            .map_err(TusError::from)
    }
}

/// The `Tus-Resumable` version the client speaks, if sent.
pub fn tus_resumable(map: &HeaderMap) -> TusResult<Option<&str>> {
    header_str(map, headers::TUS_RESUMABLE)
}

/// The `X-HTTP-Method-Override` value, if sent.
pub fn method_override(map: &HeaderMap) -> TusResult<Option<&str>> {
    header_str(map, headers::X_HTTP_METHOD_OVERRIDE)
}

fn header_str<'a>(map: &'a HeaderMap, name: &str) -> TusResult<Option<&'a str>> {
    map.get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| TusError::Validation(format!("{name} is not valid ASCII")))
        })
        .transpose()
}

fn optional_u64(map: &HeaderMap, name: &str) -> TusResult<Option<u64>> {
    let Some(raw) = header_str(map, name)? else {
        return Ok(None);
    };
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TusError::Validation(format!(
            "{name} must be a non-negative integer, got {raw:?}"
        )));
    }
    raw.parse()
        .map(Some)
        .map_err(|_| TusError::Validation(format!("{name} is out of range: {raw}")))
}

fn defer_length(map: &HeaderMap) -> TusResult<bool> {
    match header_str(map, headers::UPLOAD_DEFER_LENGTH)? {
        None => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(TusError::Validation(format!(
            "Upload-Defer-Length must be 1, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_create_with_length_and_metadata() {
        let req = CreateRequest::from_headers(&map(&[
            ("upload-length", "10"),
            ("upload-metadata", "filename d29ybGRfZG9taW5hdGlvbi5wZGY=,is_confidential"),
        ]))
        .unwrap();
        assert_eq!(req.upload_length, Some(10));
        assert_eq!(req.metadata.filename(), Some("world_domination.pdf"));
        assert_eq!(req.metadata.get("is_confidential"), Some(""));
    }

    #[test]
    fn test_create_deferred() {
        let req = CreateRequest::from_headers(&map(&[("upload-defer-length", "1")])).unwrap();
        assert_eq!(req.upload_length, None);
        assert!(req.metadata.is_empty());
    }

    #[test]
    fn test_create_requires_a_length_signal() {
        assert!(matches!(
            CreateRequest::from_headers(&HeaderMap::new()),
            Err(TusError::Validation(_))
        ));
        assert!(CreateRequest::from_headers(&map(&[("upload-defer-length", "0")])).is_err());
        assert!(
            CreateRequest::from_headers(&map(&[
                ("upload-length", "5"),
                ("upload-defer-length", "1")
            ]))
            .is_err()
        );
    }

    #[test]
    fn test_lengths_must_be_plain_integers() {
        for bad in ["-1", "1.5", "", "0x10", "+3", "99999999999999999999999"] {
            let mut headers = HeaderMap::new();
            headers.insert("upload-length", HeaderValue::from_str(bad).unwrap());
            assert!(CreateRequest::from_headers(&headers).is_err(), "{bad:?}");
        }
        let zero = CreateRequest::from_headers(&map(&[("upload-length", "0")])).unwrap();
        assert_eq!(zero.upload_length, Some(0));
    }

    #[test]
    fn test_patch_request() {
        let req = PatchRequest::from_headers(&map(&[
            ("upload-offset", "5"),
            ("content-type", "application/offset+octet-stream"),
            ("upload-checksum", "sha1 qvTGHdzF6KLavt4PO0gs2a6pQ00="),
        ]))
        .unwrap();
        assert_eq!(req.upload_offset, 5);
        assert!(req.has_offset_content_type());
        let checksum = req.checksum().unwrap().unwrap();
        assert_eq!(checksum.algorithm, "sha1");
        assert_eq!(checksum.digest, "qvTGHdzF6KLavt4PO0gs2a6pQ00=");
    }

    #[test]
    fn test_patch_requires_offset() {
        assert!(matches!(
            PatchRequest::from_headers(&map(&[(
                "content-type",
                "application/offset+octet-stream"
            )])),
            Err(TusError::Validation(_))
        ));
    }

    #[test]
    fn test_patch_content_type() {
        let plain = PatchRequest::from_headers(&map(&[
            ("upload-offset", "0"),
            ("content-type", "text/plain"),
        ]))
        .unwrap();
        assert!(!plain.has_offset_content_type());

        let missing = PatchRequest::from_headers(&map(&[("upload-offset", "0")])).unwrap();
        assert!(!missing.has_offset_content_type());
    }

    #[test]
    fn test_malformed_checksum_is_rejected_lazily() {
        let req = PatchRequest::from_headers(&map(&[
            ("upload-offset", "0"),
            ("upload-checksum", "sha1"),
        ]))
        .unwrap();
        assert!(matches!(req.checksum(), Err(TusError::Validation(_))));
    }
}
