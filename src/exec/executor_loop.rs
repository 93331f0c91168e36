// src/exec/executor_loop.rs

//! Transfer loops and failure forwarding.
//!
//! Jobs stay in `data_in` / `data_out` while their transfer runs so other
//! stages can see that staging is pending. Only the transfer loop removes
//! them, once the outcome is recorded on the job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::StageContext;
use crate::errors::Result;
use crate::exec::backend::TransferTarget;
use crate::job::{errorcodes, SharedJob};
use crate::types::{JobState, TransferStatus};

const IDLE_POLL: Duration = Duration::from_millis(500);

pub async fn run_stagein(ctx: Arc<StageContext>) -> Result<()> {
    info!("stage-in loop started");
    while ctx.keep_running() {
        let pending = ctx.queues.data_in.snapshot();
        if pending.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }
        for job in pending {
            stage_in_job(&ctx, &job).await;
        }
    }
    info!("stage-in loop finished");
    Ok(())
}

/// Transfer the inputs of one job and move it to `finished_data_in` or
/// `failed_data_in`.
pub async fn stage_in_job(ctx: &StageContext, job: &SharedJob) {
    let target = {
        let mut j = job.lock();
        if j.state.is_terminal() {
            None
        } else {
            j.stagein = TransferStatus::InProgress;
            j.timings.stagein_start = Some(Utc::now());
            Some(TransferTarget::from_job(&j))
        }
    };
    let Some(target) = target else {
        let jobid = job.lock().jobid.clone();
        debug!(jobid, "job ended before stage-in, skipping");
        ctx.queues.data_in.remove_job(&jobid);
        return;
    };
    let jobid = target.jobid.clone();
    info!(jobid, files = target.files.len(), "stage-in started");

    let result = ctx.collab.transfer.stage_in(&target).await;
    ctx.queues.data_in.remove_job(&jobid);

    let mut j = job.lock();
    j.timings.stagein_end = Some(Utc::now());
    match result {
        Ok(()) => {
            j.stagein = TransferStatus::Done;
            drop(j);
            debug!(jobid, "stage-in done");
            ctx.queues.finished_data_in.put(job.clone());
        }
        Err(e) => {
            warn!(jobid, error = %e, "stage-in failed");
            j.stagein = TransferStatus::Failed;
            j.set_state(JobState::Failed);
            j.add_error(errorcodes::STAGEINFAILED, e.to_string());
            drop(j);
            ctx.traces.set_error_code(errorcodes::STAGEINFAILED);
            ctx.queues.failed_data_in.put(job.clone());
        }
    }
}

pub async fn run_stageout(ctx: Arc<StageContext>) -> Result<()> {
    info!("stage-out loop started");
    while ctx.keep_running() {
        let pending = ctx.queues.data_out.snapshot();
        if pending.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }
        for job in pending {
            stage_out_job(&ctx, &job).await;
        }
    }
    info!("stage-out loop finished");
    Ok(())
}

/// Transfer the outputs (or only the log) of one job.
///
/// Log-only transfers just record the outcome; whoever queued the job is
/// waiting for it. Full transfers route the job to `finished_jobs` or
/// `failed_jobs`.
pub async fn stage_out_job(ctx: &StageContext, job: &SharedJob) {
    let (target, log_only) = {
        let mut j = job.lock();
        let log_only = j.log_only_stageout;
        if log_only {
            j.log_transfer = TransferStatus::InProgress;
        } else {
            j.stageout = TransferStatus::InProgress;
            j.timings.stageout_start = Some(Utc::now());
        }
        (TransferTarget::from_job(&j), log_only)
    };
    let jobid = target.jobid.clone();
    info!(jobid, log_only, "stage-out started");

    let result = ctx.collab.transfer.stage_out(&target, log_only).await;

    if log_only {
        let status = match &result {
            Ok(()) => TransferStatus::Done,
            Err(e) => {
                warn!(jobid, error = %e, "log transfer failed");
                TransferStatus::Failed
            }
        };
        job.lock().log_transfer = status;
        ctx.queues.data_out.remove_job(&jobid);
        return;
    }

    ctx.queues.data_out.remove_job(&jobid);
    let mut j = job.lock();
    j.timings.stageout_end = Some(Utc::now());
    match result {
        Ok(()) => {
            j.stageout = TransferStatus::Done;
            j.log_transfer = TransferStatus::Done;
            j.set_state(JobState::Finished);
            drop(j);
            info!(jobid, "stage-out done");
            ctx.queues.finished_jobs.put(job.clone());
        }
        Err(e) => {
            warn!(jobid, error = %e, "stage-out failed");
            j.stageout = TransferStatus::Failed;
            if !j.set_state(JobState::Failed) {
                j.force_failed();
            }
            j.add_error(errorcodes::STAGEOUTFAILED, e.to_string());
            drop(j);
            ctx.traces.set_error_code(errorcodes::STAGEOUTFAILED);
            ctx.queues.failed_jobs.put(job.clone());
        }
    }
}

/// Move jobs from `failed_payloads` and `failed_data_in` to `failed_jobs`.
pub async fn run_forwarding(ctx: Arc<StageContext>) -> Result<()> {
    info!("failure forwarding started");
    while ctx.keep_running() {
        let mut moved = false;
        for source in [&ctx.queues.failed_payloads, &ctx.queues.failed_data_in] {
            while let Some(job) = source.try_get() {
                debug!(jobid = %job.lock().jobid, from = source.name(), "forwarding failed job");
                ctx.queues.failed_jobs.put(job);
                moved = true;
            }
        }
        if !moved {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
    info!("failure forwarding finished");
    Ok(())
}
