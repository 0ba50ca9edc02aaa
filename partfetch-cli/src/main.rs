use std::path::Path;
use std::time::Duration;

use clap::Parser;
use error::AppError;
use mimalloc::MiMalloc;
use partfetch_engine::{
    CacheConfig, DownloaderConfig, DownloaderConfigBuilder, RangeMethod, Retriever,
    TransferSettings,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use url::Url;

mod cli;
mod error;
mod processor;
mod utils;

use cli::CliArgs;
use processor::Job;
use utils::{parse_headers, parse_part, parse_size};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn load_settings(path: Option<&Path>) -> Result<TransferSettings, AppError> {
    let Some(path) = path else {
        return Ok(TransferSettings::default());
    };
    let json = std::fs::read_to_string(path)?;
    let settings = TransferSettings::from_json(&json)?;
    debug!(path = %path.display(), settings = ?settings, "Loaded settings file");
    Ok(settings)
}

/// Settings file first, then command line overrides
fn build_config(args: &CliArgs) -> Result<DownloaderConfig, AppError> {
    let mut builder =
        DownloaderConfigBuilder::new().with_settings(load_settings(args.config.as_deref())?);

    if let Some(method) = &args.range_method {
        builder = builder.with_range_method(method.parse::<RangeMethod>()?);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.with_timeout(Duration::from_secs(timeout));
    }
    if let Some(timeout) = args.connect_timeout {
        builder = builder.with_connect_timeout(Duration::from_secs(timeout));
    }
    if let Some(timeout) = args.read_timeout {
        builder = builder.with_read_timeout(Duration::from_secs(timeout));
    }
    if let Some(chunk_size) = &args.chunk_size {
        let chunk_size = usize::try_from(parse_size(chunk_size)?)
            .map_err(|_| AppError::InvalidInput(format!("Chunk size too large: {chunk_size}")))?;
        builder = builder.with_chunk_size(chunk_size);
    }
    if args.update_if_out_of_date {
        builder = builder.with_update_if_out_of_date(true);
    }
    if args.assume_fresh {
        builder = builder.with_assume_fresh(true);
    }
    if args.danger_accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    for (name, value) in parse_headers(&args.headers)? {
        builder = builder.with_header(name, value);
    }

    builder = if args.no_cache {
        builder.with_caching_enabled(false)
    } else if let Some(dir) = &args.cache_dir {
        builder.with_cache_config(CacheConfig {
            disk_cache_path: Some(dir.clone()),
            ..Default::default()
        })
    } else {
        builder.with_caching_enabled(true)
    };

    Ok(builder.build())
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("partfetch.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stdout, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    info!("partfetch {}", env!("CARGO_PKG_VERSION"));
    info!("==================================================================");

    let url = Url::parse(&args.url)
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL '{}': {e}", args.url)))?;
    let parts = args
        .parts
        .iter()
        .map(|p| parse_part(p))
        .collect::<Result<Vec<_>, _>>()?;

    let config = build_config(&args)?;
    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        config.timeout.as_secs(),
        config.connect_timeout.as_secs(),
        config.read_timeout.as_secs()
    );
    info!(range_method = %config.range_method, caching = config.cache_config.is_some(), "Transfer configuration");

    let retriever = Retriever::new(config).await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            trigger.cancel();
        }
    });

    let job = Job {
        url,
        output: args.output.clone(),
        parts,
        show_progress: args.show_progress,
    };
    processor::process_job(&retriever, job, cancel).await?;
    Ok(())
}
