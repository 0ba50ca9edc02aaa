use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{CacheConfig, RangeMethod};

const DEFAULT_USER_AGENT: &str = concat!("partfetch/", env!("CARGO_PKG_VERSION"));

/// Default size of the write buffer and of body chunks, 64 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configurable options for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Cache configuration; `None` disables freshness tracking
    pub cache_config: Option<CacheConfig>,

    /// How requested parts are grouped into ranges
    pub range_method: RangeMethod,

    /// Overall timeout for one request, zero for none
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Write buffer size of the transfer loop
    pub chunk_size: usize,

    /// Download again when the remote entity tag changed
    pub update_if_out_of_date: bool,

    /// Trust cached copies without asking the server
    pub assume_fresh: bool,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Skip TLS certificate verification
    pub danger_accept_invalid_certs: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            cache_config: Some(CacheConfig::default()),
            range_method: RangeMethod::default(),
            // Bodies can be large, only the idle time between chunks is bounded
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            update_if_out_of_date: false,
            assume_fresh: false,
            follow_redirects: true,
            danger_accept_invalid_certs: false,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// The part of [`DownloaderConfig`] that can be loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TransferSettings {
    pub range_method: RangeMethod,
    /// Seconds, zero for none
    pub timeout: u64,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub chunk_size: usize,
    pub update_if_out_of_date: bool,
    pub assume_fresh: bool,
    pub follow_redirects: bool,
    pub danger_accept_invalid_certs: bool,
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        let config = DownloaderConfig::default();
        Self {
            range_method: config.range_method,
            timeout: config.timeout.as_secs(),
            connect_timeout: config.connect_timeout.as_secs(),
            read_timeout: config.read_timeout.as_secs(),
            chunk_size: config.chunk_size,
            update_if_out_of_date: config.update_if_out_of_date,
            assume_fresh: config.assume_fresh,
            follow_redirects: config.follow_redirects,
            danger_accept_invalid_certs: config.danger_accept_invalid_certs,
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

impl TransferSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_json() {
        let settings = TransferSettings::from_json(
            r#"{
                "range-method": "cluster(3)",
                "chunk-size": 4096,
                "update-if-out-of-date": true,
                "headers": { "Authorization": "Bearer token" }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.range_method, RangeMethod::Cluster(3));
        assert_eq!(settings.chunk_size, 4096);
        assert!(settings.update_if_out_of_date);
        assert!(!settings.assume_fresh);
        assert!(!settings.danger_accept_invalid_certs);
        assert_eq!(settings.read_timeout, 30);
        assert_eq!(settings.headers["Authorization"], "Bearer token");
    }

    #[test]
    fn test_settings_accept_block_size() {
        let settings = TransferSettings::from_json(r#"{ "range-method": 1048576 }"#).unwrap();
        assert_eq!(settings.range_method, RangeMethod::Blocked(1 << 20));
    }
}
