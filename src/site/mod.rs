// src/site/mod.rs

//! Site and experiment specific behaviour behind one trait.
//!
//! A pilot runs under exactly one policy, chosen by `[pilot].site_policy`.

pub mod generic;
pub mod sphenix;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{PilotError, Result};
use crate::fs::FileSystem;
use crate::job::Job;
use crate::types::{JobState, SubmitMode};

pub use generic::GenericPolicy;
pub use sphenix::SphenixPolicy;

/// A job refused by the site policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: i32,
    pub diag: String,
}

impl Rejection {
    pub fn new(code: i32, diag: impl Into<String>) -> Self {
        Self {
            code,
            diag: diag.into(),
        }
    }
}

pub trait SitePolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Check a freshly acquired job before any work is done for it.
    fn validate_job(&self, job: &Job) -> std::result::Result<(), Rejection>;

    /// Whether the payload runs inside a container.
    fn do_use_container(&self, _job: &Job) -> bool {
        false
    }

    /// Wrap the payload command, e.g. for a container runtime.
    fn wrap_command(&self, command: &str) -> String {
        command.to_string()
    }

    /// Whether a time floor may keep the pilot asking for more jobs.
    fn allow_timefloor(&self, submit_mode: SubmitMode) -> bool {
        submit_mode == SubmitMode::Pull
    }

    /// Hook run once the job working directory exists.
    fn pre_cleanup(&self, _fs: &dyn FileSystem, _workdir: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extracts of local logs sent as `pilotLog` with terminal updates.
    fn log_extracts(&self, _fs: &dyn FileSystem, _job: &Job, _state: JobState, _pilot_log: &Path) -> String {
        String::new()
    }

    /// Inspect the payload output; returns a pilot error code or 0.
    fn interpret_payload(&self, _fs: &dyn FileSystem, _job: &Job, _stdout: &Path, _stderr: &Path) -> i32 {
        0
    }

    /// Job metadata (the payload job report) sent with terminal updates.
    fn get_metadata(&self, fs: &dyn FileSystem, workdir: &Path) -> Option<String> {
        let report = workdir.join("jobReport.json");
        if fs.exists(&report) {
            fs.read_to_string(&report).ok()
        } else {
            None
        }
    }
}

/// Look up a policy by its configured name.
pub fn policy_for(name: &str) -> Result<Arc<dyn SitePolicy>> {
    match name {
        "generic" => Ok(Arc::new(GenericPolicy)),
        "sphenix" => Ok(Arc::new(SphenixPolicy)),
        other => Err(PilotError::ConfigError(format!(
            "unknown site policy '{other}' (expected 'generic' or 'sphenix')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_both_policies() {
        assert_eq!(policy_for("generic").unwrap().name(), "generic");
        assert_eq!(policy_for("sphenix").unwrap().name(), "sphenix");
        assert!(policy_for("atlas").is_err());
    }

    #[test]
    fn timefloor_is_pull_mode_only() {
        let policy = GenericPolicy;
        assert!(policy.allow_timefloor(SubmitMode::Pull));
        assert!(!policy.allow_timefloor(SubmitMode::Push));
    }
}
