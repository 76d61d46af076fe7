//! Citadel CLI entry point.
//!
//! Provides `run`, `validate` and `keycode` subcommands for replaying a
//! kernel manifest, checking one without executing it, or validating a
//! single keycode.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use citadel::config::{default_config_path, load_config, load_or_default, Config};
use citadel::logging::{self, LoggingGuard};
use citadel::manifest::{run_manifest, Manifest};
use citadel::Keycode;

/// Citadel capability kernel CLI.
#[derive(Parser)]
#[command(name = "citadel", version, about)]
struct Cli {
    /// Config file (defaults to `~/.citadel/config.toml` if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Replay a manifest against a fresh kernel.
    Run {
        /// Manifest TOML file.
        manifest: PathBuf,
    },
    /// Parse and check a manifest without executing it.
    Validate {
        /// Manifest TOML file.
        manifest: PathBuf,
    },
    /// Validate a keycode and print its padded bytes.
    Keycode {
        /// Keycode text, e.g. `TRSRY`.
        text: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { manifest } => handle_run(&manifest, &config),
        Command::Validate { manifest } => handle_validate(&manifest, &config),
        Command::Keycode { text } => handle_keycode(&text),
    }
}

/// Load the explicit config file, or the default one if it exists.
fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => load_or_default(&default_config_path()?),
    }
}

/// Set up logging per config. The guard must outlive the command.
fn init_logging(config: &Config) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.logging.dir {
        Some(dir) => logging::init_production(dir, &config.logging.level).map(Some),
        None => logging::init_cli(&config.logging.level).map(|()| None),
    }
}

/// Replay a manifest and print one line per step.
fn handle_run(path: &Path, config: &Config) -> anyhow::Result<ExitCode> {
    let _logging_guard = init_logging(config)?;
    let manifest = Manifest::load(path)?;
    info!(
        path = %path.display(),
        modules = manifest.modules.len(),
        policies = manifest.policies.len(),
        steps = manifest.steps.len(),
        "replaying manifest"
    );

    let report = run_manifest(&manifest, config)
        .with_context(|| format!("failed to replay {}", path.display()))?;

    for outcome in &report.outcomes {
        let status = if outcome.matched() { "PASS" } else { "FAIL" };
        let detail = match &outcome.result {
            Ok(detail) => format!("ok: {detail}"),
            Err(error) => format!("error: {error}"),
        };
        println!(
            "[{status}] #{index} {description} (expected {expected}) -> {detail}",
            index = outcome.index,
            description = outcome.description,
            expected = outcome.expected,
        );
    }
    println!("{} event(s) committed", report.events.len());

    let mismatches = report.mismatches().count();
    if mismatches > 0 {
        println!("{mismatches} step(s) did not match expectations");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Parse and validate a manifest.
fn handle_validate(path: &Path, config: &Config) -> anyhow::Result<ExitCode> {
    let _logging_guard = init_logging(config)?;
    let manifest = Manifest::load(path)?;
    println!(
        "{}: {} module(s), {} policy(ies), {} step(s)",
        path.display(),
        manifest.modules.len(),
        manifest.policies.len(),
        manifest.steps.len()
    );
    Ok(ExitCode::SUCCESS)
}

/// Validate a keycode.
fn handle_keycode(text: &str) -> anyhow::Result<ExitCode> {
    match Keycode::parse(text) {
        Ok(keycode) => {
            println!("{keycode} = {:?}", keycode.as_bytes());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("invalid keycode: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
