//! # Cache Types
//!
//! Keys, metadata and configuration shared by the cache providers.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::heuristics::Part;

/// Status of a cached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Resource found in cache and its expiry has not passed
    Hit,
    /// Resource found but its expiry has passed; validators must be checked
    Expired,
}

/// Cache key for identifying resources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// URL of the resource
    pub url: String,
    /// Optional identifier, such as a fingerprint of the destination and parts
    pub identifier: Option<String>,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, identifier: Option<String>) -> Self {
        Self {
            url: url.into(),
            identifier,
        }
    }

    /// Key of a download of `parts` of `url` into `target`; no parts means the whole resource
    pub fn for_request(url: impl Into<String>, target: &Path, parts: &[Part]) -> Self {
        let path = target.as_os_str().as_encoded_bytes();
        let mut hasher = Sha256::new();
        hasher.update((path.len() as u64).to_le_bytes());
        hasher.update(path);
        for part in parts {
            hasher.update(part.offset.to_le_bytes());
            hasher.update(part.length.to_le_bytes());
        }
        Self::new(url, Some(format!("dest-{:x}", hasher.finalize())))
    }

    /// Convert to a filename-safe string
    pub fn to_filename(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.url);
        if let Some(id) = &self.identifier {
            hasher.update(":");
            hasher.update(id);
        }

        format!("{:x}", hasher.finalize())
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Validators recorded for a downloaded resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the resource was cached
    pub cached_at: u64,
    /// Server-provided expiry, seconds since the epoch
    pub expires_at: Option<u64>,
    /// ETag value if available
    pub etag: Option<String>,
    /// Last-Modified header value if available
    pub last_modified: Option<String>,
    /// Content type of the resource
    pub content_type: Option<String>,
    /// Size of the downloaded file in bytes
    pub size: u64,
}

impl CacheMetadata {
    pub fn new(size: u64) -> Self {
        Self {
            cached_at: now_secs(),
            expires_at: None,
            etag: None,
            last_modified: None,
            content_type: None,
            size,
        }
    }

    pub fn with_expires_at(mut self, expires_at: Option<u64>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_etag_option(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_last_modified_option(mut self, last_modified: Option<String>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_content_type_option(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Whether the expiry is known and lies after `now`
    pub fn is_fresh_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    pub fn status(&self) -> CacheStatus {
        if self.is_fresh_at(now_secs()) {
            CacheStatus::Hit
        } else {
            CacheStatus::Expired
        }
    }
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Path for disk cache storage
    pub disk_cache_path: Option<PathBuf>,
    /// Maximum size of memory cache in bytes
    pub max_memory_cache_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_cache_path: None,                   // If None, we'll use system temp dir
            max_memory_cache_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// A type representing the result of a cache lookup operation
pub type CacheLookupResult = CacheResult<Option<(Bytes, CacheMetadata, CacheStatus)>>;
