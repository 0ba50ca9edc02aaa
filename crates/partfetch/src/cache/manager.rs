//! # Cache Manager
//!
//! Puts the memory cache in front of the file cache.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io;
use tracing::debug;

use crate::cache::providers::file::FileCache;
use crate::cache::providers::memory::MemoryCache;
use crate::cache::providers::provider::CacheProvider;
use crate::cache::types::{CacheConfig, CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

#[derive(Clone)]
pub struct CacheManager {
    memory_cache: Arc<MemoryCache>,
    file_cache: Arc<FileCache>,
    config: Arc<CacheConfig>,
}

impl CacheManager {
    /// Create a new cache manager with the specified configuration
    pub async fn new(config: CacheConfig) -> io::Result<Self> {
        // If no disk cache path provided, use system temp
        let cache_dir = config
            .disk_cache_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("partfetch-cache"));

        let memory_cache = Arc::new(MemoryCache::new(config.max_memory_cache_size.max(1)));
        let file_cache = Arc::new(FileCache::new(cache_dir));

        if config.enabled {
            file_cache.ensure_initialized().await?;
            debug!(dir = ?file_cache.cache_dir(), "Cache initialized");
        }

        Ok(Self {
            memory_cache,
            file_cache,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl CacheProvider for CacheManager {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        if !self.config.enabled {
            return Ok(None);
        }

        if let Some(hit) = self.memory_cache.get(key).await? {
            return Ok(Some(hit));
        }

        if let Some((data, metadata, status)) = self.file_cache.get(key).await? {
            // Promote for faster access next time
            let _ = self
                .memory_cache
                .put(key.clone(), data.clone(), metadata.clone())
                .await;

            return Ok(Some((data, metadata, status)));
        }

        Ok(None)
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let _ = self
            .memory_cache
            .put(key.clone(), data.clone(), metadata.clone())
            .await;

        self.file_cache.put(key, data, metadata).await
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mem_result = self.memory_cache.invalidate(key).await;
        let file_result = self.file_cache.invalidate(key).await;

        // Return file cache error if any, otherwise memory cache error if any
        file_result.or(mem_result)
    }
}
