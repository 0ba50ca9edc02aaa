//! # Request Builder
//!
//! Builds `Range` header values and issues range requests.

use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use tracing::debug;
use url::Url;

use crate::DownloadError;
use crate::heuristics::Block;
use crate::transport::{RangeResponse, RangeTransport};

/// `bytes=start1-end1,start2-end2,...` with inclusive ends
pub fn range_header(blocks: &[Block]) -> String {
    let ranges: Vec<String> = blocks
        .iter()
        .map(|b| format!("{}-{}", b.offset, b.last_byte()))
        .collect();
    format!("bytes={}", ranges.join(","))
}

/// Open-ended range used to resume a download at `offset`
pub fn suffix_range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// A pending request for a resource, with or without a `Range` header
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl RangeRequest {
    /// Request the whole resource
    pub fn full(url: Url, headers: HeaderMap) -> Self {
        Self { url, headers }
    }

    /// Request every block in a single multi-range header, even when there is only one
    pub fn blocks(url: Url, headers: HeaderMap, blocks: &[Block]) -> Result<Self, DownloadError> {
        Self::full(url, headers).with_range(&range_header(blocks))
    }

    /// Request everything from `offset` to the end of the resource
    pub fn suffix(url: Url, headers: HeaderMap, offset: u64) -> Result<Self, DownloadError> {
        Self::full(url, headers).with_range(&suffix_range_header(offset))
    }

    fn with_range(mut self, value: &str) -> Result<Self, DownloadError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::InvalidParts(format!("{value}: {e}")))?;
        self.headers.insert(RANGE, value);
        Ok(self)
    }

    pub fn range(&self) -> Option<&str> {
        self.headers.get(RANGE).and_then(|v| v.to_str().ok())
    }

    pub async fn send(&self, transport: &dyn RangeTransport) -> Result<RangeResponse, DownloadError> {
        debug!(url = %self.url, range = ?self.range(), "Sending request");
        transport.get(&self.url, &self.headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_lists_all_blocks() {
        let blocks = vec![Block::new(0, 50), Block::new(100, 50)];
        assert_eq!(range_header(&blocks), "bytes=0-49,100-149");
        assert_eq!(range_header(&[Block::new(5, 3)]), "bytes=5-7");
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(suffix_range_header(1234), "bytes=1234-");

        let url = Url::parse("http://example.com/data.bin").unwrap();
        let request = RangeRequest::suffix(url, HeaderMap::new(), 10).unwrap();
        assert_eq!(request.range(), Some("bytes=10-"));
    }

    #[test]
    fn test_full_request_has_no_range() {
        let url = Url::parse("http://example.com/data.bin").unwrap();
        let request = RangeRequest::full(url, HeaderMap::new());
        assert_eq!(request.range(), None);
    }
}
