// src/stages/acquisition.rs

//! Acquisition: obtain one job at a time and wait for it to complete.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dispatcher::build_getjob_params;
use crate::engine::{StageContext, QUEUE_TIMEOUT};
use crate::errors::{PilotError, Result};
use crate::job::{parse_job_definition_file, share, JobDefinition};
use crate::stages::eligibility::{proceed_with_getjob, AcquisitionCounters, GateDecision};
use crate::stages::listener::BrokerMessage;
use crate::stages::queue_monitor::KILL_STAGEOUT_WINDOW;
use crate::types::JobSource;

/// How a failed attempt to obtain a job should be handled.
#[derive(Debug)]
enum AcquireError {
    /// Count it and try again later.
    Retry(PilotError),
    /// Nothing will ever work; stop the pilot.
    Fatal(PilotError),
}

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("acquisition started");
    let mut counters = AcquisitionCounters::default();

    while !ctx.flags.is_graceful_stop() {
        counters.getjob_requests += 1;
        if let GateDecision::Stop { reason, code } = proceed_with_getjob(&ctx, &counters).await {
            info!(reason, ?code, "no further job will be requested");
            ctx.flags.request_graceful_stop(&reason);
            ctx.flags.request_abort();
            wait_for_final_update(&ctx).await;
            break;
        }

        let pre_getjob = Utc::now();
        let definition = match obtain_definition(&ctx).await {
            Ok(Some(definition)) => definition,
            Ok(None) => continue,
            Err(AcquireError::Fatal(e)) => {
                error!(error = %e, "cannot obtain a job");
                ctx.flags.request_graceful_stop("fatal job definition error");
                break;
            }
            Err(AcquireError::Retry(e)) => {
                counters.getjob_failures += 1;
                warn!(
                    error = %e,
                    failures = counters.getjob_failures,
                    max = ctx.config.acquisition.max_getjob_failures,
                    "did not get a job"
                );
                if counters.getjob_failures > ctx.config.acquisition.max_getjob_failures {
                    ctx.flags.request_graceful_stop("too many failed getJob attempts");
                    break;
                }
                let delay = Duration::from_secs(ctx.config.getjob_retry_delay_secs());
                ctx.flags.sleep_or_stop(delay).await;
                continue;
            }
        };

        let mut job = match definition.to_job() {
            Ok(job) => job,
            Err(e) => {
                counters.getjob_failures += 1;
                warn!(error = %e, "job definition cannot be used");
                if counters.getjob_failures > ctx.config.acquisition.max_getjob_failures {
                    ctx.flags.request_graceful_stop("too many unusable job definitions");
                    break;
                }
                continue;
            }
        };
        job.reset_errors();
        job.timings.pre_getjob = Some(pre_getjob);
        job.timings.post_getjob = Some(Utc::now());
        ctx.traces.reset_for_new_job();

        let jobid = job.jobid.clone();
        info!(jobid, taskid = %job.taskid, "received job");
        ctx.flags.set_active_job(&jobid);
        ctx.queues.jobs.put(share(job));

        let completed = wait_for_completion(&ctx, &jobid).await;
        ctx.flags.clear_active_job();
        if !completed {
            warn!(jobid, "stopped before the job was completed");
            break;
        }

        let reaped = ctx.collab.process.reap_children().await;
        debug!(jobid, reaped, "job slot released");
        ctx.flags.reset_job_slot();
        counters.getjob_requests = 0;
        counters.jobs_done += 1;
    }

    info!(jobs = counters.jobs_done, "acquisition finished");
    Ok(())
}

/// Get a job definition from the configured source. `Ok(None)` means the
/// pilot is stopping.
async fn obtain_definition(ctx: &StageContext) -> std::result::Result<Option<JobDefinition>, AcquireError> {
    match ctx.config.acquisition.source {
        JobSource::File => read_definition_file(ctx).map(Some),
        JobSource::Dispatcher => request_job(ctx, None).await.map(Some),
        JobSource::Broker => {
            let Some(taskid) = wait_for_get_job_message(ctx).await else {
                return Ok(None);
            };
            request_job(ctx, taskid.as_deref()).await.map(Some)
        }
    }
}

fn read_definition_file(ctx: &StageContext) -> std::result::Result<JobDefinition, AcquireError> {
    let path = ctx.config.job_definition_path();
    if !ctx.fs.exists(&path) {
        return Err(AcquireError::Retry(PilotError::JobDefinition(format!(
            "no job definition file at {}",
            path.display()
        ))));
    }
    let contents = ctx
        .fs
        .read_to_string(&path)
        .map_err(|e| AcquireError::Retry(PilotError::Other(e)))?;
    let definition = parse_job_definition_file(&contents).map_err(AcquireError::Fatal)?;
    if let Err(e) = ctx.fs.remove_file(&path) {
        warn!(path = %path.display(), error = %e, "cannot remove consumed job definition file");
    }
    debug!(path = %path.display(), "job definition read from file");
    Ok(definition)
}

async fn request_job(
    ctx: &StageContext,
    taskid: Option<&str>,
) -> std::result::Result<JobDefinition, AcquireError> {
    let disk_space = ctx.collab.disk.available_mb(&ctx.config.pilot.workdir);
    let params = build_getjob_params(&ctx.config, &ctx.node, disk_space, taskid);
    let definition = ctx
        .dispatcher
        .get_job(params)
        .await
        .map_err(AcquireError::Retry)?;
    match definition.status_code() {
        0 => Ok(definition),
        code => Err(AcquireError::Retry(PilotError::StatusCode(code))),
    }
}

/// Block until a `get_job` broker message arrives. Returns the task id it
/// carries, or `None` on graceful stop.
async fn wait_for_get_job_message(ctx: &StageContext) -> Option<Option<String>> {
    loop {
        if ctx.flags.is_graceful_stop() {
            return None;
        }
        if let Some(BrokerMessage::GetJob { taskid }) = ctx.queues.messages.get(QUEUE_TIMEOUT).await {
            return Some(taskid);
        }
    }
}

/// Poll `completed_jobids` until `jobid` shows up. After a graceful stop
/// the wait is bounded by the kill-time stage-out window plus the final
/// update allowance. Returns false when it gave up.
async fn wait_for_completion(ctx: &StageContext, jobid: &str) -> bool {
    let poll = Duration::from_millis(ctx.config.acquisition.completion_poll_ms);
    let grace = KILL_STAGEOUT_WINDOW
        + Duration::from_secs(ctx.config.acquisition.final_update_wait_secs);
    let mut stop_seen: Option<Instant> = None;

    loop {
        if ctx.queues.completed_jobids.contains_id(jobid) {
            info!(jobid, "job completed");
            return true;
        }
        if ctx.flags.is_graceful_stop() {
            if !ctx.flags.has_active_job() {
                return false;
            }
            let since = *stop_seen.get_or_insert_with(Instant::now);
            if since.elapsed() > grace {
                return false;
            }
        }
        tokio::time::sleep(poll).await;
    }
}

/// Give a pending final update a bounded chance to finish.
async fn wait_for_final_update(ctx: &StageContext) {
    let deadline = Instant::now() + Duration::from_secs(ctx.config.acquisition.final_update_wait_secs);
    while ctx.flags.final_update_in_flight() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(ctx.config.acquisition.completion_poll_ms)).await;
    }
}
