// src/logging.rs

//! Logging setup for `jobpilot` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line
//! 2. `PILOT_LOG`, which takes full `EnvFilter` directives
//!    (e.g. `info,jobpilot::heartbeat=debug`)
//! 3. `info`
//!
//! Events go to stderr and, when a pilot log path is given, are appended
//! to that file without colours. Site policies read the tail of the pilot
//! log back for failure reports.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "PILOT_LOG";

/// Install the global subscriber. Call once, after the config is known.
pub fn init_logging(cli_level: Option<LogLevel>, pilot_log: Option<&Path>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    let stderr = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    let file = match pilot_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening pilot log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .context("installing the tracing subscriber")?;
    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level_directive(level));
    }
    env.filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_environment() {
        let filter = build_filter(Some(LogLevel::Warn), Some("trace"));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn environment_takes_directives() {
        let filter = build_filter(None, Some(" info,jobpilot::heartbeat=debug "));
        let rendered = filter.to_string();
        assert!(rendered.contains("jobpilot::heartbeat=debug"));
        assert!(rendered.contains("info"));
    }

    #[test]
    fn garbage_falls_back_to_info() {
        assert_eq!(build_filter(None, Some("jobpilot=loud")).to_string(), "info");
        assert_eq!(build_filter(None, Some("")).to_string(), "info");
        assert_eq!(build_filter(None, None).to_string(), "info");
    }
}
