// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobpilot`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobpilot",
    version,
    about = "Worker-node agent that acquires, monitors and reports one dispatched job at a time.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). Defaults to `$PILOT_CONFIG`, then
    /// `Pilot.toml`.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override `[pilot].site` from the config file.
    #[arg(long, value_name = "NAME")]
    pub site: Option<String>,

    /// Override `[pilot].queue` from the config file.
    #[arg(long, value_name = "NAME")]
    pub queue: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PILOT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the config, print the effective settings, and exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
