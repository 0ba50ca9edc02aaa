//! # Transport
//!
//! The network seam of the engine. Everything above this module talks to a
//! [`RangeTransport`], which sends `HEAD` and `GET` requests and hands back
//! the status, headers and a lazy body stream.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::DownloadError;

/// A boxed stream of body chunks
pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// A response whose headers are known and whose body has not been read yet
pub struct RangeResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxByteStream,
}

impl RangeResponse {
    /// Get a header value as a string, if present and valid
    pub fn header(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends requests for a resource
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Fetch the response headers of a resource without its body
    async fn head(&self, url: &Url, headers: &HeaderMap) -> Result<HeaderMap, DownloadError>;

    /// Start a `GET` request; non-success statuses are errors
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<RangeResponse, DownloadError>;
}

/// [`RangeTransport`] backed by a reqwest [`Client`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn head(&self, url: &Url, headers: &HeaderMap) -> Result<HeaderMap, DownloadError> {
        let response = self
            .client
            .head(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DownloadError::StatusCode {
                url: url.to_string(),
                status: response.status(),
            });
        }

        debug!(url = %url, headers = ?response.headers(), "HEAD response");
        Ok(response.headers().clone())
    }

    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<RangeResponse, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::StatusCode {
                url: url.to_string(),
                status,
            });
        }

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|result| result.map_err(DownloadError::HttpError))
            .boxed();

        Ok(RangeResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}
