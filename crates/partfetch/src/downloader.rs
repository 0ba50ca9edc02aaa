//! # HTTP Downloader
//!
//! Ties the pieces together for one resource: probe the server, plan the
//! transfer, request the blocks, decode the response, filter the parts and
//! write them to disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use humansize::{BINARY, format_size};
use moka::sync::Cache;
use reqwest::StatusCode;
use reqwest::header::CONTENT_RANGE;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheMetadata, now_secs};
use crate::client::create_client;
use crate::decoder::{ContentRange, DecodeContext, ResponseShape};
use crate::filter::filtered;
use crate::heuristics::{Part, RangeMethod, compress_parts, compute_byte_ranges};
use crate::policy::{Freshness, FreshnessPolicy, TransferPlan, plan_for_target};
use crate::probe::{ResourceInfo, probe};
use crate::request::RangeRequest;
use crate::transfer::{self, TransferOptions, TransferReport, WriteMode};
use crate::transport::{BoxByteStream, HttpTransport, RangeResponse, RangeTransport};
use crate::{DownloadError, DownloaderConfig};

/// A resource, or parts of it, to be written to `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    pub target: PathBuf,
    /// Byte ranges to fetch, sorted and non-overlapping; empty for the whole resource
    pub parts: Vec<Part>,
    /// Overrides the configured range method
    pub range_method: Option<RangeMethod>,
    /// Overrides the configured re-download behaviour
    pub update_if_out_of_date: Option<bool>,
}

impl DownloadRequest {
    pub fn new(url: Url, target: impl Into<PathBuf>) -> Self {
        Self {
            url,
            target: target.into(),
            parts: Vec::new(),
            range_method: None,
            update_if_out_of_date: None,
        }
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_range_method(mut self, range_method: RangeMethod) -> Self {
        self.range_method = Some(range_method);
        self
    }

    pub fn with_update_if_out_of_date(mut self, update: bool) -> Self {
        self.update_if_out_of_date = Some(update);
        self
    }
}

/// A response that has been opened and is ready to be written
pub struct PreparedTransfer {
    pub plan: TransferPlan,
    /// How the server answered a ranged request; `None` for whole-resource downloads
    pub shape: Option<ResponseShape>,
    pub stream: BoxByteStream,
}

impl fmt::Debug for PreparedTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTransfer")
            .field("plan", &self.plan)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Resources whose `HEAD` answer is remembered by one downloader
const RESOURCE_INFO_CAPACITY: u64 = 256;

/// Downloads resources or byte ranges of them over HTTP
#[derive(Clone)]
pub struct HttpDownloader {
    config: Arc<DownloaderConfig>,
    transport: Arc<dyn RangeTransport>,
    resources: Cache<Url, ResourceInfo>,
}

impl HttpDownloader {
    /// Create a downloader backed by a reqwest client
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config)?;
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new(client))))
    }

    pub fn with_transport(config: DownloaderConfig, transport: Arc<dyn RangeTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            resources: Cache::new(RESOURCE_INFO_CAPACITY),
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Ask the server about `url`; answers are remembered for the most recent resources
    #[instrument(skip(self), level = "debug")]
    pub async fn try_headers(&self, url: &Url) -> Result<ResourceInfo, DownloadError> {
        if let Some(info) = self.resources.get(url) {
            return Ok(info);
        }

        let info = probe(self.transport.as_ref(), url, &self.config.headers).await?;
        self.resources.insert(url.clone(), info.clone());
        Ok(info)
    }

    /// Like [`try_headers`](Self::try_headers), with failures logged and
    /// reported as a resource without known capabilities
    pub async fn headers(&self, url: &Url) -> ResourceInfo {
        match self.try_headers(url).await {
            Ok(info) => info,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to probe resource");
                ResourceInfo::default()
            }
        }
    }

    /// File name proposed by the server, or the last segment of the URL path
    pub async fn title(&self, url: &Url) -> String {
        if let Some(name) = self.headers(url).await.suggested_filename {
            return name;
        }
        url_file_name(url)
            .map(str::to_string)
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "download".to_string())
    }

    /// Extension of the URL path, or of the server's proposed file name when
    /// the path has none
    pub async fn extension(&self, url: &Url) -> Option<String> {
        if let Some(ext) = url_file_name(url).and_then(extension_of) {
            return Some(ext);
        }
        // Only ask the server when the URL does not tell
        self.headers(url)
            .await
            .suggested_filename
            .as_deref()
            .and_then(extension_of)
    }

    /// Open the response for `request`, resuming a partial file when possible
    #[instrument(skip(self), fields(url = %request.url), level = "debug")]
    pub async fn prepare(&self, request: &DownloadRequest) -> Result<PreparedTransfer, DownloadError> {
        let url = &request.url;
        let info = self.headers(url).await;
        let mut plan = plan_for_target(&info, &request.parts, &request.target).await?;

        let (shape, stream) = if request.parts.is_empty() {
            (None, self.open_whole(url, &mut plan).await?)
        } else {
            let method = request.range_method.unwrap_or(self.config.range_method);
            let (shape, stream) = self.open_parts(url, &info, &request.parts, method).await?;
            (Some(shape), stream)
        };

        debug!(
            url = %url,
            size = ?plan.size,
            mode = %plan.mode,
            skip = plan.skip,
            encoded = plan.encoded,
            "Prepared transfer"
        );

        Ok(PreparedTransfer { plan, shape, stream })
    }

    async fn open_whole(&self, url: &Url, plan: &mut TransferPlan) -> Result<BoxByteStream, DownloadError> {
        let headers = self.config.headers.clone();
        let request = match plan.resume_from() {
            Some(offset) => RangeRequest::suffix(url.clone(), headers, offset)?,
            None => RangeRequest::full(url.clone(), headers),
        };
        let response = request.send(self.transport.as_ref()).await?;

        if let Some(offset) = plan.resume_from() {
            if response.status == StatusCode::OK {
                warn!(url = %url, offset, "Server ignored the resume request, restarting");
                plan.mode = WriteMode::Overwrite;
                plan.skip = 0;
            } else {
                check_resume_range(&response, offset)?;
            }
        }

        Ok(response.body)
    }

    async fn open_parts(
        &self,
        url: &Url,
        info: &ResourceInfo,
        parts: &[Part],
        method: RangeMethod,
    ) -> Result<(ResponseShape, BoxByteStream), DownloadError> {
        let headers = self.config.headers.clone();
        let offsets = || parts.iter().map(|p| p.offset).collect::<Vec<_>>();

        if !info.accept_ranges {
            compress_parts(parts)?;
            warn!(url = %url, "Server does not support byte ranges, downloading whole file");
            let response = RangeRequest::full(url.clone(), headers)
                .send(self.transport.as_ref())
                .await?;
            return Ok((
                ResponseShape::NoRanges,
                filtered(response.body, parts.to_vec(), offsets()),
            ));
        }

        let ranges = compute_byte_ranges(parts, method)?;
        let response = RangeRequest::blocks(url.clone(), headers.clone(), &ranges.blocks)?
            .send(self.transport.as_ref())
            .await?;
        let shape = ResponseShape::detect(&response)?;

        let stream = match &shape {
            ResponseShape::NoRanges => {
                warn!(url = %url, "Server ignored the range request, filtering the whole body");
                filtered(response.body, parts.to_vec(), offsets())
            }
            _ => {
                let context = DecodeContext {
                    transport: self.transport.clone(),
                    url: url.clone(),
                    headers,
                };
                let decoded = shape.clone().decode(response, ranges.blocks, context);
                filtered(decoded, parts.to_vec(), ranges.positions)
            }
        };

        Ok((shape, stream))
    }

    /// Write a prepared response to `target`
    pub async fn transfer(
        &self,
        prepared: PreparedTransfer,
        target: &Path,
        mut options: TransferOptions,
    ) -> Result<TransferReport, DownloadError> {
        if options.buffer_size == 0 {
            options.buffer_size = self.config.chunk_size;
        }
        transfer::run(prepared.stream, target, prepared.plan.mode, options).await
    }

    /// Prepare and run the transfer for `request`
    #[instrument(skip(self, options), fields(url = %request.url), level = "debug")]
    pub async fn download(
        &self,
        request: &DownloadRequest,
        options: TransferOptions,
    ) -> Result<TransferReport, DownloadError> {
        let prepared = self.prepare(request).await?;
        if let Some(size) = prepared.plan.size {
            info!(
                url = %request.url,
                target = %request.target.display(),
                size = %format_size(size, BINARY),
                "Downloading"
            );
        }
        self.transfer(prepared, &request.target, options).await
    }

    /// Whether a copy downloaded with validators `cached` should be fetched again
    #[instrument(skip(self, cached), level = "debug")]
    pub async fn out_of_date(
        &self,
        url: &Url,
        cached: &CacheMetadata,
        update_if_out_of_date: Option<bool>,
    ) -> Freshness {
        let policy = FreshnessPolicy {
            assume_fresh: self.config.assume_fresh,
            update_if_out_of_date: update_if_out_of_date
                .unwrap_or(self.config.update_if_out_of_date),
        };

        policy
            .check(url.as_str(), cached, now_secs(), || async {
                let info = probe(self.transport.as_ref(), url, &self.config.headers).await?;
                self.resources.insert(url.clone(), info.clone());
                Ok::<_, DownloadError>(info)
            })
            .await
    }
}

fn check_resume_range(response: &RangeResponse, offset: u64) -> Result<(), DownloadError> {
    let value = response.header(CONTENT_RANGE);
    match value.and_then(ContentRange::parse) {
        Some(range) if range.start == offset && range.end >= range.start => Ok(()),
        _ => Err(DownloadError::malformed(
            response.url.clone(),
            value.unwrap_or("<missing Content-Range>"),
            format!("bytes {offset}-*/*"),
        )),
    }
}

fn url_file_name(url: &Url) -> Option<&str> {
    url.path_segments()?.next_back().filter(|s| !s.is_empty())
}

const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst"];

/// Extension of a file name including the dot, such as `.grib` or `.tar.gz`
pub fn extension_of(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    if let Some(ext) = COMPOUND_EXTENSIONS.iter().find(|ext| lower.ends_with(*ext)) {
        return Some(ext.to_string());
    }

    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty() && !ext.contains('/')).then(|| format!(".{ext}"))
}
