// src/engine/mod.rs

//! Orchestration engine for the pilot.
//!
//! This module ties together:
//! - the queue fabric that moves jobs between stages ([`queue`])
//! - the control flags every stage watches ([`flags`])
//! - signal handling ([`signals`])
//! - the supervisor that starts the stages and reacts to their failures
//!   ([`supervisor`])
//!
//! Everything a stage needs is bundled in a [`StageContext`], shared as an
//! `Arc` between all stage tasks.

pub mod flags;
pub mod queue;
pub mod signals;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::dispatcher::Dispatcher;
use crate::exec::Collaborators;
use crate::fs::FileSystem;
use crate::job::errorcodes::CodeTable;
use crate::site::SitePolicy;
use crate::workernode::WorkerNode;

pub use flags::{ControlFlags, ServerUpdate, Traces, WrapUp};
pub use queue::{JobQueue, NamedQueue, Queues};
pub use supervisor::{StageFailure, Supervisor, SupervisorReport};

/// Timeout of a single queue receive; stages re-check the flags in between.
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state and collaborators of one pilot run.
#[derive(Debug)]
pub struct StageContext {
    pub config: ConfigFile,
    pub queues: Queues,
    pub flags: ControlFlags,
    pub traces: Traces,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub site: Arc<dyn SitePolicy>,
    pub collab: Collaborators,
    pub fs: Arc<dyn FileSystem>,
    pub codes: CodeTable,
    pub node: WorkerNode,
}

impl StageContext {
    pub fn new(
        config: ConfigFile,
        dispatcher: Arc<dyn Dispatcher>,
        site: Arc<dyn SitePolicy>,
        collab: Collaborators,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let codes = CodeTable::from_config(&config.monitor.codes);
        Self {
            config,
            queues: Queues::new(),
            flags: ControlFlags::new(),
            traces: Traces::new(),
            dispatcher,
            site,
            collab,
            fs,
            codes,
            node: WorkerNode::default(),
        }
    }

    pub fn with_node(mut self, node: WorkerNode) -> Self {
        self.node = node;
        self
    }

    /// Stages downstream of acquisition keep going after a graceful stop
    /// until the job in flight has been completed.
    pub fn keep_running(&self) -> bool {
        !self.flags.is_graceful_stop() || self.flags.has_active_job()
    }

    pub fn pilot_log_path(&self) -> PathBuf {
        self.config.pilot.pilot_home.join(&self.config.pilot.pilot_log)
    }

    /// Working directory created for a job.
    pub fn job_workdir(&self, jobid: &str) -> PathBuf {
        self.config.pilot.workdir.join(format!("PanDA_Pilot-{jobid}"))
    }

    pub fn payload_stdout(&self, workdir: &std::path::Path) -> PathBuf {
        workdir.join(&self.config.payload.stdout)
    }

    pub fn payload_stderr(&self, workdir: &std::path::Path) -> PathBuf {
        workdir.join(&self.config.payload.stderr)
    }
}
