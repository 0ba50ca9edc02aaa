//! # File Cache
//!
//! Persistent cache provider. Each entry is a data file plus a JSON
//! `.meta` file, both named after the hashed key.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::types::{CacheKey, CacheLookupResult, CacheMetadata, CacheResult};

use super::CacheProvider;

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    initialized: Arc<AtomicBool>,
}

impl FileCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.to_filename())
    }

    fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.data_path(key).with_extension("meta")
    }

    async fn remove_files(&self, key: &CacheKey) -> CacheResult<()> {
        for path in [self.data_path(key), self.metadata_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to remove cache file");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    async fn get(&self, key: &CacheKey) -> CacheLookupResult {
        let meta_path = self.metadata_path(key);
        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to read cache metadata file");
                return Ok(None);
            }
        };

        let metadata: CacheMetadata = match serde_json::from_slice(&metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to parse cache metadata, discarding entry");
                self.remove_files(key).await?;
                return Ok(None);
            }
        };

        let data_path = self.data_path(key);
        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?data_path, error = %e, "Failed to read cache data file");
                return Ok(None);
            }
        };

        let status = metadata.status();
        Ok(Some((Bytes::from(data), metadata, status)))
    }

    async fn put(&self, key: CacheKey, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_path = self.data_path(&key);
        let meta_path = self.metadata_path(&key);

        let metadata_json = serde_json::to_vec_pretty(&metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize metadata: {e}"),
            )
        })?;

        // Write to temporary files, then rename over the old entry
        let temp_data_path = data_path.with_extension("tmp");
        let temp_meta_path = meta_path.with_extension("meta.tmp");

        if let Err(e) = fs::write(&temp_data_path, &data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(from = ?temp_data_path, to = ?data_path, error = %e, "Failed to rename temporary data file");
            let _ = fs::remove_file(&temp_data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(from = ?temp_meta_path, to = ?meta_path, error = %e, "Failed to rename temporary metadata file");
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        debug!(key = ?key, path = ?meta_path, "Cached entry to file");
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<()> {
        self.remove_files(key).await
    }
}
