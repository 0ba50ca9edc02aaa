//! # Retriever
//!
//! Cache-aware front of [`HttpDownloader`]: a resource already on disk is
//! only fetched again when its validators say it changed.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CacheManager, CacheMetadata, CacheProvider};
use crate::downloader::{DownloadRequest, HttpDownloader};
use crate::policy::Freshness;
use crate::transfer::{TransferOptions, TransferReport};
use crate::{DownloadError, DownloaderConfig};

/// What [`Retriever::retrieve`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveOutcome {
    /// The local copy was kept
    Cached(Freshness),
    /// The resource was downloaded, or a partial download completed
    Downloaded(TransferReport),
}

#[derive(Clone)]
pub struct Retriever {
    downloader: HttpDownloader,
    cache: Option<Arc<dyn CacheProvider>>,
}

fn cache_error(e: io::Error) -> DownloadError {
    DownloadError::Cache(e.to_string())
}

async fn file_len(path: &Path) -> Result<Option<u64>, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Retriever {
    /// Build a downloader and, when configured, a cache from `config`
    pub async fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let cache = match &config.cache_config {
            Some(cache_config) => {
                let manager = CacheManager::new(cache_config.clone())
                    .await
                    .map_err(cache_error)?;
                Some(Arc::new(manager) as Arc<dyn CacheProvider>)
            }
            None => None,
        };
        Ok(Self::with_parts(HttpDownloader::new(config)?, cache))
    }

    pub fn with_parts(downloader: HttpDownloader, cache: Option<Arc<dyn CacheProvider>>) -> Self {
        Self { downloader, cache }
    }

    pub fn downloader(&self) -> &HttpDownloader {
        &self.downloader
    }

    /// Make sure `request.target` holds a current copy of the requested bytes
    #[instrument(skip(self, options), fields(url = %request.url), level = "debug")]
    pub async fn retrieve(
        &self,
        request: &DownloadRequest,
        options: TransferOptions,
    ) -> Result<RetrieveOutcome, DownloadError> {
        let key = CacheKey::for_request(request.url.as_str(), &request.target, &request.parts);

        if let Some(verdict) = self.check_local_copy(request, &key).await? {
            info!(
                url = %request.url,
                target = %request.target.display(),
                verdict = ?verdict,
                "Using local copy"
            );
            return Ok(RetrieveOutcome::Cached(verdict));
        }

        let report = self.downloader.download(request, options).await?;
        if !report.cancelled {
            self.record(request, key).await;
        }
        Ok(RetrieveOutcome::Downloaded(report))
    }

    /// `Some` when the local copy is complete and may be kept
    async fn check_local_copy(
        &self,
        request: &DownloadRequest,
        key: &CacheKey,
    ) -> Result<Option<Freshness>, DownloadError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(local_len) = file_len(&request.target).await? else {
            return Ok(None);
        };
        let Some((_, cached, _)) = cache.get(key).await.map_err(cache_error)? else {
            debug!(url = %request.url, "No validators recorded for local file");
            return Ok(None);
        };

        if cached.size != local_len {
            // Interrupted earlier; the downloader resumes it
            debug!(url = %request.url, local_len, expected = cached.size, "Local copy incomplete");
            return Ok(None);
        }

        let verdict = self
            .downloader
            .out_of_date(&request.url, &cached, request.update_if_out_of_date)
            .await;
        if !verdict.is_stale() {
            return Ok(Some(verdict));
        }

        cache.invalidate(key).await.map_err(cache_error)?;
        tokio::fs::remove_file(&request.target).await?;
        Ok(None)
    }

    async fn record(&self, request: &DownloadRequest, key: CacheKey) {
        let Some(cache) = &self.cache else {
            return;
        };

        let info = self.downloader.headers(&request.url).await;
        let size = match file_len(&request.target).await {
            Ok(Some(size)) => size,
            Ok(None) => return,
            Err(e) => {
                warn!(target = %request.target.display(), error = %e, "Cannot stat downloaded file");
                return;
            }
        };

        let metadata: CacheMetadata = info.cache_metadata(size);
        let data = match serde_json::to_vec(&info) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(error = %e, "Failed to serialize resource info");
                Bytes::new()
            }
        };

        if let Err(e) = cache.put(key, data, metadata).await {
            warn!(url = %request.url, error = %e, "Failed to record validators");
        }
    }
}
