// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PilotError, Result};
use crate::types::{JobSource, Workflow};

/// Loop intervals below this would turn the job monitor into a busy loop.
const MIN_MONITOR_INTERVAL_MS: u64 = 500;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PilotError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_identity(cfg)?;
    validate_dispatcher(cfg)?;
    validate_acquisition(cfg)?;
    validate_heartbeat(cfg)?;
    validate_monitor(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> PilotError {
    PilotError::ConfigError(msg.into())
}

fn validate_identity(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pilot.site.trim().is_empty() {
        return Err(config_error("[pilot].site must be set"));
    }
    if cfg.pilot.queue.trim().is_empty() {
        return Err(config_error("[pilot].queue must be set"));
    }
    if cfg.pilot.job_label.trim().is_empty() {
        return Err(config_error("[pilot].job_label must not be empty"));
    }
    Ok(())
}

fn validate_dispatcher(cfg: &RawConfigFile) -> Result<()> {
    let needs_server =
        cfg.pilot.update_server || cfg.acquisition.source != JobSource::File;
    if needs_server && cfg.dispatcher.url.trim().is_empty() {
        return Err(config_error(
            "[dispatcher].url must be set unless jobs come from a file and server updates are off",
        ));
    }
    if cfg.dispatcher.attempts == 0 {
        return Err(config_error("[dispatcher].attempts must be >= 1 (got 0)"));
    }
    if cfg.dispatcher.timeout_secs == 0 {
        return Err(config_error("[dispatcher].timeout_secs must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_acquisition(cfg: &RawConfigFile) -> Result<()> {
    if cfg.acquisition.max_getjob_failures == 0 {
        return Err(config_error(
            "[acquisition].max_getjob_failures must be >= 1 (got 0)",
        ));
    }
    if cfg.acquisition.source == JobSource::File
        && cfg.acquisition.job_definition_file.trim().is_empty()
    {
        return Err(config_error(
            "[acquisition].job_definition_file must be set when source = \"file\"",
        ));
    }
    if cfg.pilot.workflow == Workflow::Stager && cfg.acquisition.source == JobSource::Broker {
        return Err(config_error(
            "the stager workflow cannot take jobs from the message broker",
        ));
    }
    Ok(())
}

fn validate_heartbeat(cfg: &RawConfigFile) -> Result<()> {
    if cfg.heartbeat.period_secs == 0 || cfg.heartbeat.debug_period_secs == 0 {
        return Err(config_error("[heartbeat] periods must be >= 1 second"));
    }
    Ok(())
}

fn validate_monitor(cfg: &RawConfigFile) -> Result<()> {
    if cfg.monitor.loop_interval_ms < MIN_MONITOR_INTERVAL_MS {
        return Err(config_error(format!(
            "[monitor].loop_interval_ms must be >= {MIN_MONITOR_INTERVAL_MS} (got {})",
            cfg.monitor.loop_interval_ms
        )));
    }

    // A probe code may belong to at most one action class.
    let codes = &cfg.monitor.codes;
    let mut seen = HashSet::new();
    for code in codes
        .kill_now
        .iter()
        .chain(&codes.near_expiry)
        .chain(&codes.lease_expiry)
    {
        if *code == 0 {
            return Err(config_error(
                "[monitor.codes] must not classify exit code 0 (healthy)",
            ));
        }
        if !seen.insert(*code) {
            return Err(config_error(format!(
                "[monitor.codes] code {code} appears in more than one class"
            )));
        }
    }
    Ok(())
}
