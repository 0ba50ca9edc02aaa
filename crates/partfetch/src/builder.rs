//! # Builder for DownloaderConfig
//!
//! Fluent construction of [`DownloaderConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use partfetch_engine::{DownloaderConfig, RangeMethod};
//!
//! let config = DownloaderConfig::builder()
//!     .with_range_method(RangeMethod::Blocked(1024 * 1024))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_update_if_out_of_date(true)
//!     .build();
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::config::TransferSettings;
use crate::{CacheConfig, DownloaderConfig, RangeMethod};

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Set the cache configuration
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.config.cache_config = Some(cache_config);
        self
    }

    /// Enable or disable caching
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        if enabled {
            if self.config.cache_config.is_none() {
                self.config.cache_config = Some(CacheConfig::default());
            }
        } else {
            self.config.cache_config = None;
        }
        self
    }

    pub fn with_range_method(mut self, range_method: RangeMethod) -> Self {
        self.config.range_method = range_method;
        self
    }

    /// Set the overall timeout for one request, zero for none
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (maximum time between receiving data chunks)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the write buffer size; zero keeps the default
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.config.chunk_size = chunk_size;
        }
        self
    }

    pub fn with_update_if_out_of_date(mut self, update: bool) -> Self {
        self.config.update_if_out_of_date = update;
        self
    }

    pub fn with_assume_fresh(mut self, assume_fresh: bool) -> Self {
        self.config.assume_fresh = assume_fresh;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Accept invalid TLS certificates; only for trusted test servers
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header; invalid names or values are skipped
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.headers.insert(name, value);
            }
            _ => warn!(name = name.as_ref(), "Ignoring invalid header"),
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Apply settings loaded from a file
    pub fn with_settings(mut self, settings: TransferSettings) -> Self {
        self = self
            .with_range_method(settings.range_method)
            .with_timeout(Duration::from_secs(settings.timeout))
            .with_connect_timeout(Duration::from_secs(settings.connect_timeout))
            .with_read_timeout(Duration::from_secs(settings.read_timeout))
            .with_chunk_size(settings.chunk_size)
            .with_update_if_out_of_date(settings.update_if_out_of_date)
            .with_assume_fresh(settings.assume_fresh)
            .with_follow_redirects(settings.follow_redirects)
            .danger_accept_invalid_certs(settings.danger_accept_invalid_certs);

        if let Some(user_agent) = settings.user_agent {
            self = self.with_user_agent(user_agent);
        }
        for (name, value) in &settings.headers {
            self = self.with_header(name, value);
        }
        self
    }

    /// Build the DownloaderConfig instance
    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
