//! # Cache System
//!
//! Records the validators (entity tag, expiry, size) of downloaded
//! resources so later requests can decide whether a local copy is current.

mod manager;
pub mod providers;
mod types;

pub(crate) use types::now_secs;

pub use manager::CacheManager;
pub use types::{CacheConfig, CacheKey, CacheLookupResult, CacheMetadata, CacheResult, CacheStatus};

pub use providers::{CacheProvider, FileCache, MemoryCache};
