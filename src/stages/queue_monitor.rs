// src/stages/queue_monitor.rs

//! Queue monitor: close out jobs that reached `finished_jobs` or
//! `failed_jobs` with their final update.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::StageContext;
use crate::errors::Result;
use crate::heartbeat::send_state;
use crate::job::SharedJob;
use crate::types::{JobState, TransferStatus};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Time the batch system leaves between a kill signal and the hard kill.
pub const KILL_STAGEOUT_WINDOW: Duration = Duration::from_secs(120);
/// Safety margin kept free at the end of the kill window.
const KILL_MARGIN: Duration = Duration::from_secs(5);
/// Used when the kill window is already spent or the arithmetic is off.
const FALLBACK_STAGEOUT_WAIT: Duration = Duration::from_secs(60);

/// How long to wait for an in-flight stage-out after a kill signal.
pub fn kill_stageout_wait(since_kill: Duration) -> Duration {
    let window = KILL_STAGEOUT_WINDOW.as_secs() as i64;
    let wait = window - since_kill.as_secs() as i64 - KILL_MARGIN.as_secs() as i64;
    if wait > 0 && wait <= window {
        Duration::from_secs(wait as u64)
    } else {
        FALLBACK_STAGEOUT_WAIT
    }
}

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("queue monitor started");
    while ctx.keep_running() {
        let (job, failed) = if let Some(job) = ctx.queues.finished_jobs.try_get() {
            (job, false)
        } else if let Some(job) = ctx.queues.failed_jobs.try_get() {
            (job, true)
        } else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };
        close_job(&ctx, job, failed).await;
    }
    info!("queue monitor finished");
    Ok(())
}

async fn close_job(ctx: &StageContext, job: SharedJob, failed: bool) {
    let jobid = job.lock().jobid.clone();
    info!(jobid, failed, "closing job");

    if failed {
        ctx.flags.request_abort();
        let needs_log = {
            let mut j = job.lock();
            let needs = j.log_transfer == TransferStatus::NotStarted && j.workdir.is_some();
            if needs {
                j.log_only_stageout = true;
            }
            needs
        };
        if needs_log {
            ctx.queues.data_out.put(job.clone());
            wait_for_log_transfer(ctx, &job, &jobid).await;
        }
    }

    if ctx.queues.completed_jobids.contains_id(&jobid) {
        debug!(jobid, "job already completed");
        return;
    }

    // After a kill signal the batch system allows a fixed window before the
    // hard kill; an in-flight stage-out may use what is left of it.
    if let Some(since_kill) = ctx.flags.since_kill_signal() {
        wait_for_stageout(ctx, &job, &jobid, kill_stageout_wait(since_kill)).await;
    }

    let state = if failed { JobState::Failed } else { JobState::Finished };
    let outcome = send_state(ctx, &job, state).await;
    if !outcome.is_success() {
        warn!(jobid, "final update failed; the job leaves the pilot uncompleted");
    }

    if ctx.flags.abort_requested() {
        ctx.flags.acknowledge_abort();
    }
    cleanup_workdir(ctx, &job);

    ctx.queues.monitored_payloads.remove_job(&jobid);
    ctx.queues.completed_jobs.put(job);
    ctx.queues.completed_jobids.put(jobid);
}

/// Poll until the log transfer settles or the job left `data_out`.
/// Wait, bounded by the monitor config, for a log-only stage-out to settle.
pub async fn wait_for_log_transfer(ctx: &StageContext, job: &SharedJob, jobid: &str) {
    let poll = Duration::from_secs(ctx.config.monitor.log_transfer_poll_secs);
    for _ in 0..ctx.config.monitor.log_transfer_max_polls {
        if job.lock().log_transfer.is_settled() {
            debug!(jobid, "log transfer settled");
            return;
        }
        if !ctx.queues.data_out.contains_job(jobid) {
            debug!(jobid, "job left data_out");
            return;
        }
        tokio::time::sleep(poll).await;
    }
    warn!(jobid, "gave up waiting for the log transfer");
}

async fn wait_for_stageout(ctx: &StageContext, job: &SharedJob, jobid: &str, max_wait: Duration) {
    let deadline = Instant::now() + max_wait;
    info!(jobid, max_wait_secs = max_wait.as_secs(), "waiting for stage-out after kill signal");
    loop {
        let in_flight = job.lock().stageout == TransferStatus::InProgress
            || ctx.queues.data_out.contains_job(jobid);
        if !in_flight {
            return;
        }
        if Instant::now() >= deadline {
            warn!(jobid, "stage-out still running at the end of the kill window");
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn cleanup_workdir(ctx: &StageContext, job: &SharedJob) {
    let (jobid, workdir, cleanup) = {
        let j = job.lock();
        (j.jobid.clone(), j.workdir.clone(), j.cleanup)
    };
    let Some(workdir) = workdir else {
        return;
    };
    if !cleanup {
        info!(jobid, workdir = %workdir.display(), "keeping job workdir");
        return;
    }
    if let Err(e) = ctx.fs.remove_dir_all(&workdir) {
        warn!(jobid, error = %e, "cannot remove job workdir");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stageout_wait_uses_remaining_kill_window() {
        assert_eq!(kill_stageout_wait(Duration::from_secs(0)), Duration::from_secs(115));
        assert_eq!(kill_stageout_wait(Duration::from_secs(100)), Duration::from_secs(15));
    }

    #[test]
    fn stageout_wait_falls_back_when_window_is_spent() {
        assert_eq!(kill_stageout_wait(Duration::from_secs(115)), FALLBACK_STAGEOUT_WAIT);
        assert_eq!(kill_stageout_wait(Duration::from_secs(500)), FALLBACK_STAGEOUT_WAIT);
    }
}
