//! # Memory Cache Provider
//!
//! In-process cache of resource validators, backed by Moka.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

// Accounts for the key and metadata, which are not part of the payload
const ENTRY_OVERHEAD: u64 = 256;

#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    metadata: CacheMetadata,
}

impl CacheEntry {
    fn weight(&self) -> u64 {
        self.data.len() as u64 + ENTRY_OVERHEAD
    }
}

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<CacheKey, CacheEntry>,
    max_size: u64,
}

impl MemoryCache {
    /// Create a memory cache holding at most `max_size_bytes` of entries
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .weigher(|_k, v: &CacheEntry| v.weight().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory cache created");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        Ok(self.cache.get(key).await.map(|entry| {
            let status = entry.metadata.status();
            (entry.data, entry.metadata, status)
        }))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        let entry = CacheEntry { data, metadata };

        if entry.weight() > self.max_size {
            warn!(
                key = ?key,
                size = entry.weight(),
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<()> {
        if self.cache.remove(key).await.is_some() {
            debug!(key = ?key, "Removed entry from memory cache");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{CacheStatus, now_secs};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(format!("http://example.com/{name}"), None)
    }

    async fn settle(cache: &MemoryCache) {
        cache.cache.run_pending_tasks().await;
    }

    async fn has(cache: &MemoryCache, k: &CacheKey) -> bool {
        cache.get(k).await.unwrap().is_some()
    }

    fn metadata(expires_in: Option<u64>) -> CacheMetadata {
        CacheMetadata::new(10)
            .with_etag_option(Some("\"v1\"".to_string()))
            .with_expires_at(expires_in.map(|secs| now_secs() + secs))
    }

    #[tokio::test]
    async fn test_put_get_hit() {
        let cache = MemoryCache::new(4096);
        let k = key("item1");
        let m = metadata(Some(60));

        cache.put(k.clone(), Bytes::from_static(b"{}"), m.clone()).await.unwrap();
        settle(&cache).await;

        let (data, meta, status) = cache.get(&k).await.unwrap().expect("cached entry");
        assert_eq!(data, Bytes::from_static(b"{}"));
        assert_eq!(meta, m);
        assert_eq!(status, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let cache = MemoryCache::new(4096);
        assert!(!has(&cache, &key("missing")).await);
    }

    #[tokio::test]
    async fn test_expired_entry_is_kept() {
        let cache = MemoryCache::new(4096);
        let k = key("expired");
        cache.put(k.clone(), Bytes::new(), metadata(None)).await.unwrap();

        let (_, meta, status) = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(status, CacheStatus::Expired);
        assert_eq!(meta.etag.as_deref(), Some("\"v1\""));

        settle(&cache).await;
        assert!(has(&cache, &k).await);
    }

    #[tokio::test]
    async fn test_put_too_large_entry() {
        let cache = MemoryCache::new(300);
        let k = key("large");
        cache
            .put(k.clone(), Bytes::from(vec![0u8; 100]), metadata(Some(60)))
            .await
            .unwrap();
        settle(&cache).await;
        assert!(!has(&cache, &k).await);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = MemoryCache::new(4096);
        let (k1, k2) = (key("one"), key("two"));
        cache.put(k1.clone(), Bytes::new(), metadata(Some(60))).await.unwrap();
        cache.put(k2.clone(), Bytes::new(), metadata(Some(60))).await.unwrap();
        settle(&cache).await;

        cache.invalidate(&k1).await.unwrap();
        assert!(!has(&cache, &k1).await);
        assert!(has(&cache, &k2).await);
        // Invalidating a missing key is fine
        cache.invalidate(&k1).await.unwrap();
    }
}
