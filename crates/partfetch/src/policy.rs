//! # Resume and Freshness Policy
//!
//! Decides how a transfer starts (from scratch or appending to a partial
//! file) and whether a previously downloaded copy is still current.

use std::future::Future;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::cache::CacheMetadata;
use crate::heuristics::Part;
use crate::probe::ResourceInfo;
use crate::transfer::WriteMode;

/// How a transfer is set up before the first request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Expected number of bytes on disk once done, if known
    pub size: Option<u64>,
    pub mode: WriteMode,
    /// Bytes already present and not requested again
    pub skip: u64,
    /// The body is content-encoded, so `size` is not the file size
    pub encoded: bool,
}

impl TransferPlan {
    /// Range header value to resume from, if resuming
    pub fn resume_from(&self) -> Option<u64> {
        match self.mode {
            WriteMode::Append { offset } => Some(offset),
            WriteMode::Overwrite => None,
        }
    }
}

/// Plan a transfer of `parts` (none for the whole resource) into `target`,
/// where `existing_len` is the size of a file already there.
pub fn plan_resume(
    info: &ResourceInfo,
    parts: &[Part],
    target: &Path,
    existing_len: Option<u64>,
) -> Result<TransferPlan, DownloadError> {
    let mut plan = TransferPlan {
        size: info.content_length,
        mode: WriteMode::Overwrite,
        skip: 0,
        encoded: info.encoded,
    };

    if !parts.is_empty() {
        // Part sizes are exact whatever the encoding
        plan.size = Some(parts.iter().map(|p| p.length).sum());
        plan.encoded = false;
        return Ok(plan);
    }

    let existing = match existing_len {
        Some(existing) if existing > 0 && !info.encoded => existing,
        _ => return Ok(plan),
    };

    if let Some(remote) = info.content_length.filter(|&remote| existing >= remote) {
        return Err(DownloadError::StaleLocalState {
            path: target.to_path_buf(),
            local: existing,
            remote,
        });
    }

    if info.accept_ranges {
        info!(target = %target.display(), offset = existing, "Resuming download");
        plan.mode = WriteMode::Append { offset: existing };
        plan.skip = existing;
    } else {
        warn!(
            target = %target.display(),
            bytes = existing,
            "Bytes already downloaded, but server does not support restarts"
        );
    }

    Ok(plan)
}

/// [`plan_resume`] against the current state of `target` on disk
pub async fn plan_for_target(
    info: &ResourceInfo,
    parts: &[Part],
    target: &Path,
) -> Result<TransferPlan, DownloadError> {
    let existing_len = match tokio::fs::metadata(target).await {
        Ok(meta) => Some(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    plan_resume(info, parts, target, existing_len)
}

/// Verdict on a previously downloaded copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Trusted without asking the server
    Fresh,
    /// The server reports the same entity
    Unchanged,
    /// The entity changed and re-downloading is enabled
    Stale,
    /// The entity changed but the local copy is kept
    ChangedKept,
    /// The server could not be asked; the local copy is kept
    ProbeFailed,
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Never ask the server
    pub assume_fresh: bool,
    /// Re-download when the entity tag changed
    pub update_if_out_of_date: bool,
}

impl FreshnessPolicy {
    /// Judge `cached` at time `now` (epoch seconds); `probe` is only called
    /// when the cached expiry does not settle the question.
    pub async fn check<F, Fut>(
        &self,
        url: &str,
        cached: &CacheMetadata,
        now: u64,
        probe: F,
    ) -> Freshness
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResourceInfo, DownloadError>>,
    {
        if self.assume_fresh {
            return Freshness::Fresh;
        }

        if cached.is_fresh_at(now) {
            debug!(url, expires_at = ?cached.expires_at, now, "Not expired");
            return Freshness::Fresh;
        }

        let remote = match probe().await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(url, error = %e, "Could not check if remote content changed, keeping local copy");
                return Freshness::ProbeFailed;
            }
        };

        match remote.etag {
            Some(etag) if cached.etag.as_deref() != Some(etag.as_str()) => {
                warn!(url, "Remote content has changed");
                if self.update_if_out_of_date {
                    warn!(url, "Invalidating cached version and downloading again");
                    Freshness::Stale
                } else {
                    warn!(
                        url,
                        "Keeping outdated copy; enable update-if-out-of-date to download updated resources"
                    );
                    Freshness::ChangedKept
                }
            }
            _ => {
                debug!(url, "Remote content unchanged");
                Freshness::Unchanged
            }
        }
    }
}
