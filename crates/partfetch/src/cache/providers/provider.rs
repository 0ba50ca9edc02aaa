//! # Cache Provider
//!
//! The interface every cache store implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

/// A store of resource validators keyed by request
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Get an entry; expired entries are returned with [`CacheStatus::Expired`](crate::cache::CacheStatus)
    async fn get(&self, key: &CacheKey) -> CacheLookupResult;

    /// Put an entry into the cache, replacing any previous one
    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()>;

    /// Remove an entry from the cache
    async fn invalidate(&self, key: &CacheKey) -> CacheResult<()>;
}
