//! Configuration loading.
//!
//! Citadel reads an optional `config.toml` (default location
//! `~/.citadel/config.toml`). Every field has a default, so an empty or
//! missing file yields a working configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kernel behavior.
    pub kernel: KernelConfig,

    /// Audit trail destination.
    pub audit: AuditConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

/// Kernel behavior switches.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    /// Run the invariant check on every staged action before committing.
    #[serde(default = "default_check_invariants")]
    pub check_invariants: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            check_invariants: default_check_invariants(),
        }
    }
}

/// Audit trail configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file to append kernel events to. No audit file when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated JSON log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_check_invariants() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config at {}", path.display()))
}

/// Load configuration, falling back to defaults if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Resolve the default config directory (`~/.citadel/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".citadel"))
        .context("no home directory for the current user")
}

/// Default config file path (`~/.citadel/config.toml`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
