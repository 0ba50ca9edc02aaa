//! # Partfetch
//!
//! A library for downloading byte ranges of remote resources.
//!
//! Callers describe the bytes they want as a sorted list of parts. The
//! engine groups nearby parts into fewer, larger ranges, asks the server
//! for them in a single request, copes with servers that return all
//! ranges in one multipart body, one range per request, or the whole
//! resource, and writes exactly the requested bytes to disk.
//!
//! ## Features
//!
//! - Range coalescing strategies (fixed blocks, clustering, automatic)
//! - Multipart, single-range and range-less server support
//! - Resumption of interrupted whole-resource downloads
//! - Entity-tag based freshness checks of previously downloaded copies

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod heuristics;
pub mod policy;
pub mod probe;
pub mod request;
pub mod retriever;
pub mod transfer;
pub mod transport;

pub use builder::DownloaderConfigBuilder;
pub use cache::{CacheConfig, CacheManager};
pub use client::create_client;
pub use config::{DownloaderConfig, TransferSettings};
pub use decoder::ResponseShape;
pub use downloader::{DownloadRequest, HttpDownloader, PreparedTransfer};
pub use error::DownloadError;
pub use heuristics::{ByteRanges, Part, RangeMethod, compress_parts, compute_byte_ranges};
pub use policy::{Freshness, FreshnessPolicy, TransferPlan};
pub use probe::ResourceInfo;
pub use retriever::{RetrieveOutcome, Retriever};
pub use transfer::{ProgressCallback, TransferOptions, TransferReport, WriteMode};
pub use transport::{HttpTransport, RangeTransport};
