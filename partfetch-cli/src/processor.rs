use std::path::{Path, PathBuf};

use partfetch_engine::{
    DownloadRequest, Part, RetrieveOutcome, Retriever, TransferOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::utils::format_bytes;
use crate::utils::progress::ProgressManager;

/// Everything the command line asks to download
#[derive(Debug)]
pub struct Job {
    pub url: Url,
    pub output: Option<PathBuf>,
    pub parts: Vec<Part>,
    pub show_progress: bool,
}

async fn existing_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Run `job` until done or `cancel` fires
pub async fn process_job(
    retriever: &Retriever,
    job: Job,
    cancel: CancellationToken,
) -> Result<RetrieveOutcome, AppError> {
    let downloader = retriever.downloader();

    let target = match job.output {
        Some(output) => output,
        None => PathBuf::from(downloader.title(&job.url).await),
    };
    info!(url = %job.url, target = %target.display(), parts = job.parts.len(), "Starting");

    let progress = if job.show_progress {
        let (total, done) = if job.parts.is_empty() {
            let info = downloader.headers(&job.url).await;
            (info.content_length, existing_len(&target).await)
        } else {
            (Some(job.parts.iter().map(|p| p.length).sum()), 0)
        };
        let progress = ProgressManager::new(target.display().to_string(), total);
        if let Some(callback) = progress.callback() {
            // Resumed bytes count as done
            callback(done.min(total.unwrap_or(u64::MAX)));
        }
        progress
    } else {
        ProgressManager::new_disabled()
    };

    let request = DownloadRequest::new(job.url, &target).with_parts(job.parts);
    let options = TransferOptions {
        progress: progress.callback(),
        cancel: Some(cancel),
        ..Default::default()
    };

    let outcome = match retriever.retrieve(&request, options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            progress.abandon("Failed".to_string());
            return Err(e.into());
        }
    };

    match &outcome {
        RetrieveOutcome::Cached(verdict) => {
            progress.finish("Up to date".to_string());
            info!(target = %target.display(), verdict = ?verdict, "Local copy kept");
        }
        RetrieveOutcome::Downloaded(report) if report.cancelled => {
            progress.abandon("Interrupted".to_string());
            warn!(
                target = %target.display(),
                written = %format_bytes(report.bytes),
                "Download interrupted; run again to resume"
            );
        }
        RetrieveOutcome::Downloaded(report) => {
            progress.finish("Done".to_string());
            info!(
                target = %target.display(),
                written = %format_bytes(report.bytes),
                elapsed = ?report.elapsed,
                mode = %report.mode,
                "Download complete"
            );
        }
    }

    Ok(outcome)
}
