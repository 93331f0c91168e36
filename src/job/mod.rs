// src/job/mod.rs

//! The job entity and its lifecycle rules.
//!
//! A job is created by acquisition, flows through the queue fabric gaining
//! fields as stages complete, and is dropped once the queue monitor has
//! moved it into `completed_jobs` and the slot has been reset.
//!
//! Jobs travel as [`SharedJob`] handles. Queue possession decides which
//! stage may mutate a job; the mutex only makes the handle safe to share
//! and is never held across an `.await`.

pub mod definition;
pub mod errorcodes;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{JobState, ServerState, TransferStatus};

pub use definition::{parse_job_definition_file, JobDefinition};

/// Shared handle to a job travelling through the queues.
pub type SharedJob = Arc<Mutex<Job>>;

/// Wrap a job into a shareable handle.
pub fn share(job: Job) -> SharedJob {
    Arc::new(Mutex::new(job))
}

/// Wall-clock marks for the phases of a job, reported as `pilotTiming`.
#[derive(Debug, Clone, Default)]
pub struct JobTimings {
    pub pre_getjob: Option<DateTime<Utc>>,
    pub post_getjob: Option<DateTime<Utc>>,
    pub stagein_start: Option<DateTime<Utc>>,
    pub stagein_end: Option<DateTime<Utc>>,
    pub payload_start: Option<DateTime<Utc>>,
    pub payload_end: Option<DateTime<Utc>>,
    pub stageout_start: Option<DateTime<Utc>>,
    pub stageout_end: Option<DateTime<Utc>>,
    pub kill_signal: Option<DateTime<Utc>>,
}

/// Resource usage of the payload, as measured by the execution collaborator.
#[derive(Debug, Clone, Default)]
pub struct PayloadMetrics {
    pub cpu_consumption_time: u64,
    pub max_rss: u64,
    pub max_vmem: u64,
    pub max_swap: u64,
    pub max_pss: u64,
    pub n_events: u64,
    pub n_events_w: u64,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub jobid: String,
    pub taskid: String,
    pub attempt_nr: u32,
    pub label: String,
    pub job_type: Option<String>,

    pub state: JobState,
    pub server_state: ServerState,

    /// Every error recorded against the job, in the order they happened.
    pub piloterrorcodes: Vec<(i32, String)>,
    /// Primary error code reported to the dispatcher.
    pub piloterrorcode: i32,
    pub piloterrordiag: String,
    pub exe_error_code: i32,
    pub exit_code: Option<i32>,

    pub debug: bool,
    pub debug_command: Option<String>,
    /// Event-service command received over the backchannel (e.g. `softkill`).
    pub es_command: Option<String>,
    /// End-of-job workdir cleanup; turned off by `nocleanup`.
    pub cleanup: bool,

    pub workdir: Option<PathBuf>,
    pub pid: Option<u32>,
    pub pgrp: Option<u32>,
    pub corecount: u32,
    pub corecounts: Vec<u32>,

    pub indata: Vec<String>,
    pub transformation: String,
    pub job_params: String,
    pub use_container: bool,
    /// Secrets shipped in the job definition; cleared once isolated to disk.
    pub secrets: Option<String>,

    pub stagein: TransferStatus,
    pub stageout: TransferStatus,
    pub log_transfer: TransferStatus,
    /// Set when only the log should be transferred at stage-out.
    pub log_only_stageout: bool,

    pub timings: JobTimings,
    pub metrics: PayloadMetrics,
    pub last_heartbeat: Option<Instant>,
    pub completed: bool,
}

impl Job {
    pub fn new(jobid: impl Into<String>) -> Self {
        Self {
            jobid: jobid.into(),
            taskid: String::new(),
            attempt_nr: 0,
            label: "managed".to_string(),
            job_type: None,
            state: JobState::New,
            server_state: ServerState::Unset,
            piloterrorcodes: Vec::new(),
            piloterrorcode: 0,
            piloterrordiag: String::new(),
            exe_error_code: 0,
            exit_code: None,
            debug: false,
            debug_command: None,
            es_command: None,
            cleanup: true,
            workdir: None,
            pid: None,
            pgrp: None,
            corecount: 1,
            corecounts: Vec::new(),
            indata: Vec::new(),
            transformation: String::new(),
            job_params: String::new(),
            use_container: false,
            secrets: None,
            stagein: TransferStatus::NotStarted,
            stageout: TransferStatus::NotStarted,
            log_transfer: TransferStatus::NotStarted,
            log_only_stageout: false,
            timings: JobTimings::default(),
            metrics: PayloadMetrics::default(),
            last_heartbeat: None,
            completed: false,
        }
    }

    /// Move the job to `state`.
    ///
    /// Returns false (and leaves the state alone) when the job is already
    /// terminal and `state` is not, or on `finished -> failed` style moves
    /// that the caller did not explicitly allow via [`Job::force_failed`].
    pub fn set_state(&mut self, state: JobState) -> bool {
        if self.state.is_terminal() && !state.is_terminal() {
            warn!(
                jobid = %self.jobid,
                from = %self.state,
                to = %state,
                "refusing to move a terminal job back to an active state"
            );
            return false;
        }
        if self.state.is_terminal() && state.is_terminal() && self.state != state {
            warn!(
                jobid = %self.jobid,
                from = %self.state,
                to = %state,
                "refusing to change terminal state"
            );
            return false;
        }
        if self.state != state {
            debug!(jobid = %self.jobid, from = %self.state, to = %state, "job state change");
        }
        self.state = state;
        true
    }

    /// Terminal override used by error-code reconciliation: a job carrying
    /// an error cannot be reported as finished.
    pub fn force_failed(&mut self) {
        if self.state != JobState::Failed {
            debug!(jobid = %self.jobid, from = %self.state, "forcing job state to failed");
        }
        self.state = JobState::Failed;
    }

    /// Record an error. The first error becomes the primary code.
    pub fn add_error(&mut self, code: i32, diag: impl Into<String>) {
        let diag = diag.into();
        if self.piloterrorcodes.iter().any(|(c, _)| *c == code) {
            debug!(jobid = %self.jobid, code, "error code already recorded");
            return;
        }
        self.piloterrorcodes.push((code, diag.clone()));
        if self.piloterrorcode == 0 {
            self.piloterrorcode = code;
            self.piloterrordiag = diag;
        }
    }

    pub fn has_pending_error(&self) -> bool {
        self.piloterrorcode != 0 || !self.piloterrorcodes.is_empty()
    }

    /// Drop stale error state before a freshly acquired job enters the pipeline.
    pub fn reset_errors(&mut self) {
        self.piloterrorcodes.clear();
        self.piloterrorcode = 0;
        self.piloterrordiag.clear();
    }

    /// Analysis (user) jobs get recoverable errors reported as retryable.
    pub fn is_analysis(&self) -> bool {
        matches!(self.label.as_str(), "user" | "panda")
            || matches!(self.job_type.as_deref(), Some("user") | Some("analysis"))
    }

    pub fn is_production(&self) -> bool {
        matches!(self.label.as_str(), "managed" | "prod_test" | "ptest")
    }

    pub fn has_input_data(&self) -> bool {
        !self.indata.is_empty()
    }

    pub fn set_corecount(&mut self, corecount: u32) {
        if self.corecount != corecount {
            self.corecounts.push(self.corecount);
        }
        self.corecount = corecount;
    }

    /// Mark the job completed. Returns false if it already was.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        true
    }

    /// The payload command line, as handed to the execution collaborator.
    pub fn payload_command(&self) -> String {
        if self.job_params.is_empty() {
            self.transformation.clone()
        } else {
            format!("{} {}", self.transformation, self.job_params)
        }
    }
}
