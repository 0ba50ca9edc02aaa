use std::path::PathBuf;

use reqwest::StatusCode;

use crate::heuristics::Part;

// Error type for range retrieval operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server returned status code {status} for {url}")]
    StatusCode { url: String, status: StatusCode },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsError(String),

    #[error("Invalid parts: {0}")]
    InvalidParts(String),

    #[error("Invalid range method: {0}")]
    InvalidRangeMethod(String),

    /// The server answered with byte ranges that do not match what was requested.
    #[error("Malformed response from {url}: got '{header}', expected {expected}")]
    MalformedResponse {
        url: String,
        header: String,
        expected: String,
    },

    /// A part could not be located inside exactly one coalesced block.
    #[error("Part {part:?} is not contained in a single block: {detail}")]
    ProtocolMismatch { part: Part, detail: String },

    #[error(
        "{}: {local} bytes already on disk but remote size is {remote}",
        path.display()
    )]
    StaleLocalState {
        path: PathBuf,
        local: u64,
        remote: u64,
    },

    #[error("Cache error: {0}")]
    Cache(String),
}

impl DownloadError {
    pub(crate) fn malformed(
        url: impl Into<String>,
        header: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        DownloadError::MalformedResponse {
            url: url.into(),
            header: header.into(),
            expected: expected.into(),
        }
    }

    /// Whether this error was raised by the network layer rather than by
    /// the range protocol itself.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            DownloadError::StatusCode { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_carries_header() {
        let err = DownloadError::malformed("http://example.com/a", "bytes 1-2/3", "block (0, 2)");
        let msg = err.to_string();
        assert!(msg.contains("http://example.com/a"));
        assert!(msg.contains("bytes 1-2/3"));
        assert!(msg.contains("block (0, 2)"));
    }

    #[test]
    fn test_status_errors_are_transient_only_for_5xx() {
        let server = DownloadError::StatusCode {
            url: "u".to_string(),
            status: StatusCode::BAD_GATEWAY,
        };
        let client = DownloadError::StatusCode {
            url: "u".to_string(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!DownloadError::InvalidParts("x".into()).is_transient());
    }
}
