//! Tracing subscriber setup for the `citadel` binary.
//!
//! - [`init_production`]: daily-rotated JSON file under a logs directory,
//!   mirrored to stderr in human-readable form.
//! - [`init_cli`]: stderr only.
//!
//! `RUST_LOG` wins over the configured level in both modes.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File prefix for rotated logs; the appender adds the date suffix.
const LOG_FILE_PREFIX: &str = "citadel.log";

/// Keeps the background log writer running. Drop it last.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// Install file + stderr logging.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created or a global subscriber is already
/// installed. The directory is created before the subscriber is touched.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("cannot create logs directory {}", logs_dir.display()))?;

    let (file_writer, writer_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(level_filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("log subscriber already installed")?;

    Ok(LoggingGuard {
        _writer: writer_guard,
    })
}

/// Install stderr-only logging.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_cli(default_level: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(level_filter(default_level))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("log subscriber already installed: {e}"))
}

fn level_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
