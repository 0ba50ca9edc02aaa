//! # Capability Probe
//!
//! What a `HEAD` request tells us about a resource: whether byte ranges are
//! served, how large it is, and the validators used to decide if a cached
//! copy is still current.

use chrono::DateTime;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    EXPIRES, HeaderMap, HeaderName, LAST_MODIFIED,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::DownloadError;
use crate::cache::CacheMetadata;
use crate::transport::RangeTransport;

/// Capabilities and validators of a remote resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// The server advertises `Accept-Ranges: bytes`
    pub accept_ranges: bool,
    /// Size of the body on the wire; for encoded bodies this is not the file size
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    /// `Expires` as seconds since the epoch
    pub expires: Option<u64>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
    /// The body carries a `Content-Encoding`
    pub encoded: bool,
    /// File name proposed by `Content-Disposition`
    pub suggested_filename: Option<String>,
}

fn header(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

impl ResourceInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_length = header(headers, CONTENT_LENGTH).and_then(|v| match v.parse() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(value = v, error = %e, "Invalid Content-Length");
                None
            }
        });

        Self {
            accept_ranges: header(headers, ACCEPT_RANGES)
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
            content_length,
            etag: header(headers, ETAG).map(str::to_string),
            expires: header(headers, EXPIRES).and_then(parse_http_date),
            last_modified: header(headers, LAST_MODIFIED).map(str::to_string),
            content_type: header(headers, CONTENT_TYPE).map(str::to_string),
            encoded: headers.contains_key(CONTENT_ENCODING),
            suggested_filename: header(headers, CONTENT_DISPOSITION)
                .and_then(attachment_filename),
        }
    }

    /// Validators to store next to a downloaded copy
    pub fn cache_metadata(&self, size: u64) -> CacheMetadata {
        CacheMetadata::new(size)
            .with_expires_at(self.expires)
            .with_etag_option(self.etag.clone())
            .with_last_modified_option(self.last_modified.clone())
            .with_content_type_option(self.content_type.clone())
    }
}

/// Parse an HTTP date into epoch seconds.
///
/// `Expires: 0` is an HTTP/1.0 idiom for "already expired" and yields `None`,
/// as does anything that does not parse.
pub fn parse_http_date(value: &str) -> Option<u64> {
    let value = value.trim();
    if value == "0" {
        return None;
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => u64::try_from(date.timestamp()).ok(),
        Err(e) => {
            warn!(value, error = %e, "Failed to parse HTTP date");
            None
        }
    }
}

/// Extract `filename` from `Content-Disposition: attachment; filename=...`
pub fn attachment_filename(value: &str) -> Option<String> {
    let mut params = value.split(';');
    let disposition = params.next()?.trim();
    if !disposition.eq_ignore_ascii_case("attachment") {
        debug!(disposition, "Ignoring non-attachment Content-Disposition");
        return None;
    }

    params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        // Only the final path component, never a directory
        let value = value.trim().trim_matches('"');
        let name = value.rsplit(['/', '\\']).next()?.trim();
        (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
    })
}

/// Send a `HEAD` request and summarise the response
pub async fn probe(
    transport: &dyn RangeTransport,
    url: &Url,
    headers: &HeaderMap,
) -> Result<ResourceInfo, DownloadError> {
    let response_headers = transport.head(url, headers).await?;
    let info = ResourceInfo::from_headers(&response_headers);
    debug!(url = %url, info = ?info, "Probed resource");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_from_headers() {
        let info = ResourceInfo::from_headers(&headers(&[
            (ACCEPT_RANGES, "bytes"),
            (CONTENT_LENGTH, "12345"),
            (ETAG, "\"abc\""),
            (EXPIRES, "Wed, 21 Oct 2015 07:28:00 GMT"),
            (CONTENT_DISPOSITION, "attachment; filename=\"data.grib\""),
        ]));

        assert!(info.accept_ranges);
        assert_eq!(info.content_length, Some(12345));
        assert_eq!(info.etag.as_deref(), Some("\"abc\""));
        assert_eq!(info.expires, Some(1_445_412_480));
        assert!(!info.encoded);
        assert_eq!(info.suggested_filename.as_deref(), Some("data.grib"));
    }

    #[test]
    fn test_encoded_and_no_ranges() {
        let info = ResourceInfo::from_headers(&headers(&[
            (ACCEPT_RANGES, "none"),
            (CONTENT_ENCODING, "gzip"),
            (CONTENT_LENGTH, "not a number"),
        ]));
        assert!(!info.accept_ranges);
        assert!(info.encoded);
        assert_eq!(info.content_length, None);
    }

    #[test]
    fn test_parse_http_date_legacy_zero() {
        assert_eq!(parse_http_date("0"), None);
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(parse_http_date("Thu, 01 Jan 1970 00:01:00 GMT"), Some(60));
    }

    #[test]
    fn test_attachment_filename() {
        assert_eq!(
            attachment_filename("attachment; filename=report.nc").as_deref(),
            Some("report.nc")
        );
        assert_eq!(
            attachment_filename("Attachment; FILENAME=\"../../etc/passwd\"").as_deref(),
            Some("passwd")
        );
        assert_eq!(attachment_filename("inline; filename=a.txt"), None);
        assert_eq!(attachment_filename("attachment"), None);
    }

    #[test]
    fn test_cache_metadata_carries_validators() {
        let info = ResourceInfo {
            etag: Some("\"v2\"".to_string()),
            expires: Some(42),
            content_type: Some("application/x-grib".to_string()),
            ..Default::default()
        };
        let meta = info.cache_metadata(100);
        assert_eq!(meta.size, 100);
        assert_eq!(meta.etag.as_deref(), Some("\"v2\""));
        assert_eq!(meta.expires_at, Some(42));
        assert_eq!(meta.content_type.as_deref(), Some("application/x-grib"));
    }
}
