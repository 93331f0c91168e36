// src/exec/task_runner.rs

//! Payload runner: starts the payload once stage-in is done and routes the
//! job on by exit status.

use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::engine::{StageContext, QUEUE_TIMEOUT};
use crate::errors::Result;
use crate::exec::backend::PayloadTarget;
use crate::exec::command::shell;
use crate::job::{errorcodes, SharedJob};
use crate::stages::job_monitor::fail_job;
use crate::types::{JobState, TransferStatus};

const STAGEIN_POLL: Duration = Duration::from_millis(500);
const ABORT_POLL: Duration = Duration::from_secs(1);

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("payload runner started");
    while ctx.keep_running() {
        let Some(job) = ctx.queues.payloads.get(QUEUE_TIMEOUT).await else {
            continue;
        };
        let jobid = job.lock().jobid.clone();

        if !wait_for_stagein(&ctx, &job).await {
            info!(jobid, "payload not started");
            abandon_before_payload(&ctx, job).await;
            continue;
        }
        run_payload(&ctx, job).await;
    }
    info!("payload runner finished");
    Ok(())
}

/// Wait until the job shows up in `finished_data_in`. Returns false when
/// stage-in failed or the job was aborted meanwhile.
pub async fn wait_for_stagein(ctx: &StageContext, job: &SharedJob) -> bool {
    let jobid = job.lock().jobid.clone();
    loop {
        if ctx.queues.finished_data_in.remove_job(&jobid).is_some() {
            return true;
        }
        if job.lock().stagein == TransferStatus::Failed {
            debug!(jobid, "stage-in failed");
            return false;
        }
        if ctx.flags.abort_requested() {
            return false;
        }
        tokio::time::sleep(STAGEIN_POLL).await;
    }
}

/// Route a job whose payload will never start.
///
/// A failed stage-in is already on its way through `failed_data_in`.
/// Otherwise the job is failed with the kill reason, any transfer still
/// running for it is allowed to settle, its `finished_data_in` entry is
/// consumed and the job goes to `failed_payloads`. A job the dispatcher
/// already finished (stager kill) goes to `finished_jobs`.
pub async fn abandon_before_payload(ctx: &StageContext, job: SharedJob) {
    let jobid = job.lock().jobid.clone();
    if job.lock().stagein == TransferStatus::Failed {
        return;
    }

    let (code, diag) = match ctx.flags.kill_signal() {
        Some(signal) => (
            errorcodes::signal_error_code(&signal.name),
            format!("pilot received {} during stage-in", signal.name),
        ),
        None => (
            errorcodes::PANDAKILL,
            errorcodes::diagnostic(errorcodes::PANDAKILL).to_string(),
        ),
    };
    let finished = {
        let mut j = job.lock();
        if j.state == JobState::Finished {
            true
        } else {
            if !j.set_state(JobState::Failed) {
                j.force_failed();
            }
            j.add_error(code, diag);
            false
        }
    };
    if !finished {
        ctx.traces.set_error_code(code);
    }

    loop {
        let status = job.lock().stagein;
        match status {
            TransferStatus::Failed => {
                debug!(jobid, "stage-in failed after abort, left to forwarding");
                return;
            }
            TransferStatus::Done => {
                if ctx.queues.finished_data_in.remove_job(&jobid).is_some() {
                    break;
                }
            }
            TransferStatus::NotStarted => {
                ctx.queues.finished_data_in.remove_job(&jobid);
                if !ctx.queues.data_in.contains_job(&jobid) {
                    break;
                }
            }
            TransferStatus::InProgress => {}
        }
        tokio::time::sleep(STAGEIN_POLL).await;
    }

    if finished {
        info!(jobid, "job finished before its payload started");
        ctx.queues.finished_jobs.put(job);
    } else {
        warn!(jobid, code, "job aborted before its payload started");
        ctx.queues.failed_payloads.put(job);
    }
}

/// Run the payload of a job whose stage-in is done, then route the job to
/// `data_out` or `failed_payloads`.
pub async fn run_payload(ctx: &StageContext, job: SharedJob) {
    let (jobid, workdir, command) = {
        let mut j = job.lock();
        if j.stagein == TransferStatus::Failed {
            return;
        }
        j.set_state(JobState::Running);
        j.timings.payload_start = Some(Utc::now());
        (j.jobid.clone(), j.workdir.clone(), j.payload_command())
    };
    let Some(workdir) = workdir else {
        error!(jobid, "job has no working directory");
        ctx.queues.failed_payloads.put(job.clone());
        return;
    };
    ctx.queues.monitored_payloads.put(job.clone());

    let command = ctx.site.wrap_command(&command);
    let mut child = match spawn_payload(ctx, &command, &workdir) {
        Ok(child) => child,
        Err(e) => {
            error!(jobid, error = %e, "could not start payload");
            fail_job(ctx, &job, errorcodes::PAYLOADEXECUTIONFAILURE, e.to_string());
            return;
        }
    };

    let pid = child.id();
    {
        let mut j = job.lock();
        j.pid = pid;
        j.pgrp = if cfg!(unix) { pid } else { None };
    }
    if let Some(pid) = pid {
        ctx.collab.process.register(&jobid, pid);
    }
    info!(jobid, ?pid, "payload started");

    let exit_code = wait_for_payload(ctx, &job, &mut child).await;
    ctx.collab.process.unregister(&jobid);
    {
        let mut j = job.lock();
        j.timings.payload_end = Some(Utc::now());
        j.exit_code = Some(exit_code);
        j.exe_error_code = exit_code;
    }
    info!(jobid, exit_code, "payload finished");

    route_finished_payload(ctx, &job, exit_code).await;
}

fn spawn_payload(ctx: &StageContext, command: &str, workdir: &Path) -> anyhow::Result<Child> {
    let stdout = File::create(ctx.payload_stdout(workdir)).context("creating payload stdout")?;
    let stderr = File::create(ctx.payload_stderr(workdir)).context("creating payload stderr")?;

    let mut cmd = shell(command);
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().with_context(|| format!("spawning '{command}'"))
}

/// Wait for the child, killing it if the job gets aborted meanwhile.
async fn wait_for_payload(ctx: &StageContext, job: &SharedJob, child: &mut Child) -> i32 {
    let mut tick = tokio::time::interval(ABORT_POLL);
    let mut kill_sent = false;
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        warn!(error = %e, "waiting for payload failed");
                        -1
                    }
                };
            }
            _ = tick.tick() => {
                if ctx.flags.abort_requested() && !kill_sent {
                    let target = PayloadTarget::from_job(&job.lock());
                    info!(jobid = %target.jobid, "abort requested, killing payload");
                    if let Err(e) = ctx.collab.process.kill_payload(&target).await {
                        warn!(jobid = %target.jobid, error = %e, "kill failed, killing child directly");
                        let _ = child.start_kill();
                    }
                    kill_sent = true;
                }
            }
        }
    }
}

async fn route_finished_payload(ctx: &StageContext, job: &SharedJob, exit_code: i32) {
    let jobid = job.lock().jobid.clone();
    if ctx.queues.monitored_payloads.remove_job(&jobid).is_none() {
        debug!(jobid, "job was already failed by the monitor");
        return;
    }

    if job.lock().state == JobState::Failed {
        ctx.queues.failed_payloads.put(job.clone());
        return;
    }

    if exit_code != 0 {
        {
            let mut j = job.lock();
            j.set_state(JobState::Failed);
            j.add_error(
                errorcodes::PAYLOADEXECUTIONFAILURE,
                format!("payload exited with code {exit_code}"),
            );
        }
        ctx.traces.set_error_code(errorcodes::PAYLOADEXECUTIONFAILURE);
        ctx.queues.failed_payloads.put(job.clone());
        return;
    }

    let (stdout, stderr) = match job.lock().workdir.clone() {
        Some(workdir) => (ctx.payload_stdout(&workdir), ctx.payload_stderr(&workdir)),
        None => Default::default(),
    };
    let snapshot = job.lock().clone();
    let code = ctx.site.interpret_payload(ctx.fs.as_ref(), &snapshot, &stdout, &stderr);
    if code != 0 {
        {
            let mut j = job.lock();
            j.set_state(JobState::Failed);
            j.add_error(code, errorcodes::diagnostic(code));
        }
        ctx.traces.set_error_code(code);
        ctx.queues.failed_payloads.put(job.clone());
        return;
    }

    job.lock().set_state(JobState::Stageout);
    ctx.queues.data_out.put(job.clone());
}
