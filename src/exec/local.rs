// src/exec/local.rs

//! Default collaborators: shell commands, process-group signals and sysinfo.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::job::errorcodes;
use crate::workernode::available_disk_space_mb;

use super::backend::{
    DiskSpace, HealthProbe, PayloadTarget, ProcessControl, ProxyManager, TransferBackend,
    TransferTarget,
};
use super::command::{run_captured, CommandOutput};

/// Pilot error code reported by a helper command.
///
/// Exit status 0 means success. Otherwise the last stdout line is taken as
/// the error code when it parses, since exit statuses cannot carry codes
/// above 255.
fn reported_code(output: &CommandOutput, fallback: i32) -> i32 {
    if output.exit_code == 0 {
        return 0;
    }
    output
        .stdout
        .lines()
        .last()
        .and_then(|l| l.trim().parse::<i32>().ok())
        .filter(|c| *c != 0)
        .unwrap_or(fallback)
}

/// Health probe running a configured command. Without a command every
/// probe reports healthy.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: Option<String>,
}

impl CommandProbe {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

impl HealthProbe for CommandProbe {
    fn probe<'a>(&'a self, target: &'a PayloadTarget) -> BoxFuture<'a, i32> {
        Box::pin(async move {
            let Some(command) = self.command.as_deref() else {
                return 0;
            };
            let env = [
                ("PANDA_ID", target.jobid.clone()),
                ("PAYLOAD_PID", target.pid.map(|p| p.to_string()).unwrap_or_default()),
            ];
            match run_captured(command, target.workdir.as_deref(), &env).await {
                Ok(output) => reported_code(&output, errorcodes::GENERALERROR),
                Err(e) => {
                    warn!(jobid = %target.jobid, error = %e, "health probe could not run");
                    errorcodes::GENERALERROR
                }
            }
        })
    }
}

/// Kills payloads by process group and keeps track of the ones started.
#[derive(Debug, Default)]
pub struct LocalProcessControl {
    groups: Mutex<HashMap<String, u32>>,
}

impl LocalProcessControl {
    async fn kill_group(pgrp: u32) -> Result<()> {
        let output = run_captured(&format!("kill -KILL -- -{pgrp}"), None, &[]).await?;
        if output.exit_code != 0 {
            anyhow::bail!("kill of process group {pgrp} failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    fn kill_pid(pid: u32) -> Result<()> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let process = system
            .process(pid)
            .with_context(|| format!("process {pid} not found"))?;
        match process.kill_with(Signal::Kill) {
            Some(true) => Ok(()),
            _ => anyhow::bail!("could not send SIGKILL to {pid}"),
        }
    }
}

impl ProcessControl for LocalProcessControl {
    fn register(&self, jobid: &str, pgrp: u32) {
        self.groups.lock().insert(jobid.to_string(), pgrp);
    }

    fn unregister(&self, jobid: &str) {
        self.groups.lock().remove(jobid);
    }

    fn kill_payload<'a>(&'a self, target: &'a PayloadTarget) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pgrp = target
                .pgrp
                .or_else(|| self.groups.lock().get(&target.jobid).copied());
            info!(jobid = %target.jobid, ?pgrp, pid = ?target.pid, "killing payload");
            match (pgrp, target.pid) {
                (Some(pgrp), _) => Self::kill_group(pgrp).await,
                (None, Some(pid)) => Self::kill_pid(pid),
                (None, None) => {
                    debug!(jobid = %target.jobid, "no payload process to kill");
                    Ok(())
                }
            }
        })
    }

    fn reap_children(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let leftovers: Vec<(String, u32)> = self.groups.lock().drain().collect();
            let mut reaped = 0;
            for (jobid, pgrp) in leftovers {
                match Self::kill_group(pgrp).await {
                    Ok(()) => {
                        info!(jobid = %jobid, pgrp, "reaped lingering payload processes");
                        reaped += 1;
                    }
                    Err(e) => debug!(jobid = %jobid, pgrp, error = %e, "nothing left to reap"),
                }
            }
            reaped
        })
    }
}

/// Proxy handling through configured shell commands.
#[derive(Debug, Clone)]
pub struct CommandProxyManager {
    check: Option<String>,
    refresh: Option<String>,
}

impl CommandProxyManager {
    pub fn new(check: Option<String>, refresh: Option<String>) -> Self {
        Self { check, refresh }
    }
}

impl ProxyManager for CommandProxyManager {
    fn verify(&self) -> BoxFuture<'_, i32> {
        Box::pin(async move {
            let Some(check) = self.check.as_deref() else {
                return 0;
            };
            match run_captured(check, None, &[]).await {
                Ok(output) => reported_code(&output, errorcodes::NOPROXY),
                Err(e) => {
                    warn!(error = %e, "proxy check could not run");
                    errorcodes::NOPROXY
                }
            }
        })
    }

    fn refresh(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(refresh) = self.refresh.as_deref() else {
                warn!("no proxy refresh command configured");
                return false;
            };
            matches!(run_captured(refresh, None, &[]).await, Ok(o) if o.exit_code == 0)
        })
    }

    fn replace_for_job<'a>(&'a self, jobid: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(refresh) = self.refresh.as_deref() else {
                debug!(jobid, "no proxy replacement configured, keeping pilot proxy");
                return true;
            };
            let env = [("PANDA_ID", jobid.to_string())];
            matches!(run_captured(refresh, None, &env).await, Ok(o) if o.exit_code == 0)
        })
    }
}

#[derive(Debug, Clone)]
pub struct SysinfoDiskSpace {
    min_mb: u64,
}

impl SysinfoDiskSpace {
    pub fn new(min_mb: u64) -> Self {
        Self { min_mb }
    }
}

impl DiskSpace for SysinfoDiskSpace {
    fn available_mb(&self, path: &Path) -> u64 {
        available_disk_space_mb(path).unwrap_or(0)
    }

    fn check(&self, path: &Path) -> i32 {
        match available_disk_space_mb(path) {
            Some(mb) if mb >= self.min_mb => 0,
            Some(mb) => {
                warn!(available_mb = mb, required_mb = self.min_mb, "not enough local disk space");
                errorcodes::NOLOCALSPACE
            }
            None => {
                warn!(path = %path.display(), "cannot determine disk space, assuming enough");
                0
            }
        }
    }
}

/// Transfer backend for sites where data is already in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransfer;

impl TransferBackend for NoopTransfer {
    fn stage_in<'a>(&'a self, target: &'a TransferTarget) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(jobid = %target.jobid, files = target.files.len(), "stage-in: nothing to transfer");
            Ok(())
        })
    }

    fn stage_out<'a>(&'a self, target: &'a TransferTarget, log_only: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(jobid = %target.jobid, log_only, "stage-out: nothing to transfer");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn code_on_stdout_overrides_fallback() {
        assert_eq!(reported_code(&output(0, "1235"), 1163), 0);
        assert_eq!(reported_code(&output(1, "checking\n1235\n"), 1163), 1235);
        assert_eq!(reported_code(&output(1, "no proxy"), 1163), 1163);
    }

    #[tokio::test]
    async fn probe_without_command_is_healthy() {
        let probe = CommandProbe::new(None);
        assert_eq!(probe.probe(&PayloadTarget::default()).await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn health_check_that_cannot_start_is_a_general_error() {
        let probe = CommandProbe::new(Some("exit 0".to_string()));
        let target = PayloadTarget {
            jobid: "5".into(),
            workdir: Some("/nonexistent/jobpilot/workdir".into()),
            ..Default::default()
        };
        assert_eq!(probe.probe(&target).await, errorcodes::GENERALERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_reports_printed_code() {
        let probe = CommandProbe::new(Some("echo 1298; exit 1".to_string()));
        assert_eq!(probe.probe(&PayloadTarget::default()).await, 1298);
    }

    #[tokio::test]
    async fn reap_clears_registry() {
        let control = LocalProcessControl::default();
        control.register("1", 999_999);
        control.reap_children().await;
        assert!(control.groups.lock().is_empty());
    }
}
