// src/exec/backend.rs

//! Pluggable collaborator abstractions.
//!
//! The pipeline never touches credentials, disks, payload processes or
//! storage directly. It goes through these traits, so tests can swap in
//! fakes while production uses the implementations in [`local`].
//!
//! [`local`]: super::local

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::BoxFuture;
use crate::config::model::ConfigFile;
use crate::job::Job;

use super::local::{CommandProbe, CommandProxyManager, LocalProcessControl, NoopTransfer, SysinfoDiskSpace};

/// What a collaborator needs to know about the payload of a job.
#[derive(Debug, Clone, Default)]
pub struct PayloadTarget {
    pub jobid: String,
    pub pid: Option<u32>,
    pub pgrp: Option<u32>,
    pub workdir: Option<PathBuf>,
}

impl PayloadTarget {
    pub fn from_job(job: &Job) -> Self {
        Self {
            jobid: job.jobid.clone(),
            pid: job.pid,
            pgrp: job.pgrp,
            workdir: job.workdir.clone(),
        }
    }
}

/// What the transfer collaborator needs to move a job's files.
#[derive(Debug, Clone, Default)]
pub struct TransferTarget {
    pub jobid: String,
    pub workdir: Option<PathBuf>,
    pub files: Vec<String>,
}

impl TransferTarget {
    pub fn from_job(job: &Job) -> Self {
        Self {
            jobid: job.jobid.clone(),
            workdir: job.workdir.clone(),
            files: job.indata.clone(),
        }
    }
}

/// Periodic health check of a running payload. Returns 0 when healthy,
/// otherwise a pilot error code.
pub trait HealthProbe: Send + Sync + Debug {
    fn probe<'a>(&'a self, target: &'a PayloadTarget) -> BoxFuture<'a, i32>;
}

/// Payload process supervision.
pub trait ProcessControl: Send + Sync + Debug {
    /// Remember the process group of a started payload.
    fn register(&self, jobid: &str, pgrp: u32);

    fn unregister(&self, jobid: &str);

    fn kill_payload<'a>(&'a self, target: &'a PayloadTarget) -> BoxFuture<'a, Result<()>>;

    /// Kill whatever is left of earlier payloads. Returns how many process
    /// groups were reaped.
    fn reap_children(&self) -> BoxFuture<'_, usize>;
}

/// Credential checks and renewal.
pub trait ProxyManager: Send + Sync + Debug {
    /// 0 when the proxy is usable, otherwise a pilot error code.
    fn verify(&self) -> BoxFuture<'_, i32>;

    fn refresh(&self) -> BoxFuture<'_, bool>;

    /// Swap the pilot credential for one owned by the job's user.
    fn replace_for_job<'a>(&'a self, jobid: &'a str) -> BoxFuture<'a, bool>;
}

pub trait DiskSpace: Send + Sync + Debug {
    /// Free space for jobs under `path`, in MB.
    fn available_mb(&self, path: &Path) -> u64;

    /// 0 when there is enough space, otherwise `NOLOCALSPACE`.
    fn check(&self, path: &Path) -> i32;
}

/// Stage-in and stage-out of job files.
pub trait TransferBackend: Send + Sync + Debug {
    fn stage_in<'a>(&'a self, target: &'a TransferTarget) -> BoxFuture<'a, Result<()>>;

    fn stage_out<'a>(&'a self, target: &'a TransferTarget, log_only: bool) -> BoxFuture<'a, Result<()>>;
}

/// The set of collaborators a pilot runs with.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn HealthProbe>,
    pub process: Arc<dyn ProcessControl>,
    pub proxy: Arc<dyn ProxyManager>,
    pub disk: Arc<dyn DiskSpace>,
    pub transfer: Arc<dyn TransferBackend>,
}

impl Collaborators {
    /// Command and sysinfo based implementations driven by the config.
    pub fn local(config: &ConfigFile) -> Self {
        Self {
            probe: Arc::new(CommandProbe::new(config.monitor.probe_command.clone())),
            process: Arc::new(LocalProcessControl::default()),
            proxy: Arc::new(CommandProxyManager::new(
                config.pilot.proxy_check_command.clone(),
                config.pilot.proxy_refresh_command.clone(),
            )),
            disk: Arc::new(SysinfoDiskSpace::new(config.pilot.min_disk_space_mb)),
            transfer: Arc::new(NoopTransfer),
        }
    }
}
