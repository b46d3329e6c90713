//! Logging setup for the `vidtrack` binary
//!
//! Human-readable logs on stderr (stdout carries protocol lines) plus a daily
//! rolling file without ANSI colors.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "vidtrack.log";
const DEFAULT_FILTER: &str = "info,vidtrack=debug,vidtrack_batch=debug";

/// Install the global subscriber; keep the guard alive for the whole run
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("Logging initialized in {}", log_dir.display());
    Ok(guard)
}
