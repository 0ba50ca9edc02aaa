//! # Transfer Loop
//!
//! Writes a chunk stream to the destination file, reporting progress and
//! honouring cancellation between chunks.
//!
//! An overwrite goes to a sibling staging file first. A failed transfer
//! leaves an existing destination untouched.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use humansize::{BINARY, format_size};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::transport::BoxByteStream;

/// Called with the length of every chunk written
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// How the destination file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write from the start, replacing the file once the body is received
    Overwrite,
    /// Keep the first `offset` bytes and append after them
    Append { offset: u64 },
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Overwrite => write!(f, "overwrite"),
            WriteMode::Append { offset } => write!(f, "append at {offset}"),
        }
    }
}

/// Outcome of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes written by this transfer, not counting resumed data
    pub bytes: u64,
    pub elapsed: Duration,
    pub mode: WriteMode,
    /// The transfer stopped early; the partial file is kept
    pub cancelled: bool,
}

/// Options of one run of the transfer loop
#[derive(Clone, Default)]
pub struct TransferOptions {
    pub buffer_size: usize,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("buffer_size", &self.buffer_size)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

const STAGING_SUFFIX: &str = ".partfetch-tmp";

/// Where an overwrite of `target` is written until it completes
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(STAGING_SUFFIX);
    target.with_file_name(name)
}

async fn open(path: &Path, mode: WriteMode) -> Result<File, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = match mode {
        WriteMode::Overwrite => File::create(path).await?,
        WriteMode::Append { .. } => OpenOptions::new().append(true).open(path).await?,
    };
    Ok(file)
}

/// Move the staging file into place, or drop it when it must not replace `target`
async fn settle_staging(
    staging: &Path,
    target: &Path,
    failed: bool,
    target_existed: bool,
) -> Result<(), DownloadError> {
    if failed && target_existed {
        debug!(target = %target.display(), "Transfer failed, previous file kept");
        tokio::fs::remove_file(staging).await?;
        return Ok(());
    }
    tokio::fs::rename(staging, target).await?;
    Ok(())
}

/// Write `stream` to `target`
pub async fn run(
    stream: BoxByteStream,
    target: &Path,
    mode: WriteMode,
    options: TransferOptions,
) -> Result<TransferReport, DownloadError> {
    let start = Instant::now();
    let (path, staged) = match mode {
        WriteMode::Overwrite => (staging_path(target), true),
        WriteMode::Append { .. } => (target.to_path_buf(), false),
    };
    let target_existed = staged && tokio::fs::try_exists(target).await?;

    let file = open(&path, mode).await?;
    let mut writer = if options.buffer_size > 0 {
        BufWriter::with_capacity(options.buffer_size, file)
    } else {
        BufWriter::new(file)
    };

    debug!(target = %target.display(), %mode, "Starting transfer");

    let copied = copy(stream, &mut writer, &options).await;
    // Keep what was received even when the stream failed
    let flushed = writer.flush().await;
    drop(writer);
    let outcome =
        copied.and_then(|copied| flushed.map(|()| copied).map_err(DownloadError::from));

    if staged {
        let settled = settle_staging(&path, target, outcome.is_err(), target_existed).await;
        match (&outcome, settled) {
            (Ok(_), Err(e)) => return Err(e),
            (Err(_), Err(e)) => {
                warn!(staging = %path.display(), error = %e, "Failed to settle staging file");
            }
            (_, Ok(())) => {}
        }
    }
    let (bytes, cancelled) = outcome?;

    let report = TransferReport {
        bytes,
        elapsed: start.elapsed(),
        mode,
        cancelled,
    };

    if cancelled {
        warn!(
            target = %target.display(),
            bytes = report.bytes,
            "Transfer cancelled, partial file kept"
        );
    } else {
        info!(
            target = %target.display(),
            size = %format_size(report.bytes, BINARY),
            elapsed = ?report.elapsed,
            "Transfer complete"
        );
    }

    Ok(report)
}

/// Returns the number of bytes written and whether the copy was cancelled
async fn copy(
    mut stream: BoxByteStream,
    writer: &mut BufWriter<File>,
    options: &TransferOptions,
) -> Result<(u64, bool), DownloadError> {
    let mut total = 0u64;

    loop {
        // A stalled body must not delay cancellation
        let next = match &options.cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok((total, true)),
                next = stream.next() => next,
            },
            None => stream.next().await,
        };
        let Some(chunk) = next else {
            break;
        };

        let chunk: Bytes = chunk?;
        if chunk.is_empty() {
            continue;
        }

        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;

        if let Some(progress) = &options.progress {
            progress(chunk.len() as u64);
        }
    }

    Ok((total, false))
}
