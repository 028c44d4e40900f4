//! TUS protocol constants and header formatting.

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Protocol version implemented by the server.
pub const TUS_VERSION: &str = "1.0.0";

/// Protocol extensions advertised by the server.
pub const TUS_EXTENSIONS: &[&str] = &[
    "creation",
    "creation-defer-length",
    "termination",
    "checksum",
    "expiration",
];

/// Required content type of a PATCH body.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Header names.
pub mod headers {
    pub const TUS_RESUMABLE: &str = "tus-resumable";
    pub const TUS_VERSION: &str = "tus-version";
    pub const TUS_EXTENSION: &str = "tus-extension";
    pub const TUS_MAX_SIZE: &str = "tus-max-size";
    pub const TUS_CHECKSUM_ALGORITHM: &str = "tus-checksum-algorithm";
    pub const UPLOAD_LENGTH: &str = "upload-length";
    pub const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";
    pub const UPLOAD_OFFSET: &str = "upload-offset";
    pub const UPLOAD_METADATA: &str = "upload-metadata";
    pub const UPLOAD_CHECKSUM: &str = "upload-checksum";
    pub const UPLOAD_EXPIRES: &str = "upload-expires";
    pub const X_HTTP_METHOD_OVERRIDE: &str = "x-http-method-override";
}

/// Format a timestamp as an RFC 7231 HTTP date.
pub fn format_http_date(at: OffsetDateTime) -> String {
    // The format description only holds components that always format.
    at.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .unwrap_or_default()
}

/// Comma-separated extension list for the `Tus-Extension` header.
pub fn extensions_header() -> String {
    TUS_EXTENSIONS.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_format_http_date() {
        let at = datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(format_http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_format_http_date_converts_to_utc() {
        let at = datetime!(1994-11-06 10:49:37 +2);
        assert_eq!(format_http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_extensions_header() {
        assert_eq!(
            extensions_header(),
            "creation,creation-defer-length,termination,checksum,expiration"
        );
    }
}
