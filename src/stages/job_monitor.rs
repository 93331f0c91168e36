// src/stages/job_monitor.rs

//! Job monitor: probes running payloads and keeps heartbeats flowing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dispatcher::status::{is_closed_on_server, query_job_status, StatusCheck};
use crate::engine::StageContext;
use crate::errors::Result;
use crate::exec::backend::PayloadTarget;
use crate::heartbeat::{is_heartbeat_due, send_state};
use crate::job::errorcodes::{self, ProbeClass};
use crate::job::SharedJob;
use crate::stages::queue_monitor::wait_for_log_transfer;
use crate::types::{JobState, Workflow};

const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("job monitor started");
    let interval = Duration::from_millis(ctx.config.monitor.loop_interval_ms).max(MIN_LOOP_INTERVAL);
    let status_interval = Duration::from_secs(ctx.config.monitor.status_check_interval_secs);
    let mut last_status_check = Instant::now();

    while ctx.keep_running() {
        tokio::time::sleep(interval).await;

        if ctx.queues.staging_pending() {
            for job in ctx.queues.data_in.snapshot() {
                heartbeat_if_due(&ctx, &job).await;
            }
            continue;
        }

        let check_status = !status_interval.is_zero() && last_status_check.elapsed() >= status_interval;
        if check_status {
            last_status_check = Instant::now();
        }

        for job in ctx.queues.monitored_payloads.snapshot() {
            if job.lock().state != JobState::Running {
                continue;
            }
            monitor_job(&ctx, &job, check_status).await;
        }
    }
    info!("job monitor finished");
    Ok(())
}

async fn heartbeat_if_due(ctx: &StageContext, job: &SharedJob) {
    let due = is_heartbeat_due(&ctx.config.heartbeat, &job.lock(), Instant::now());
    if due {
        send_state(ctx, job, JobState::Running).await;
    }
}

async fn monitor_job(ctx: &StageContext, job: &SharedJob, check_status: bool) {
    let target = PayloadTarget::from_job(&job.lock());
    let jobid = target.jobid.as_str();

    if let Some(signal) = ctx.flags.kill_signal() {
        let code = errorcodes::signal_error_code(&signal.name);
        job.lock().timings.kill_signal = Some(signal.wall);
        warn!(jobid, signal = %signal.name, "kill signal received, failing job");
        fail_job(ctx, job, code, format!("pilot received {}", signal.name));
        return;
    }

    if let Some(max_time) = ctx.config.pilot.max_time {
        let elapsed = ctx.flags.pilot_start().elapsed();
        if elapsed >= Duration::from_secs(max_time) {
            error!(jobid, max_time, "batch system time limit reached");
            kill_payload(ctx, &target).await;
            fail_job(ctx, job, errorcodes::REACHEDMAXTIME, errorcodes::diagnostic(errorcodes::REACHEDMAXTIME));
            return;
        }
    }

    if check_status {
        match query_job_status(ctx.dispatcher.as_ref(), jobid).await {
            Ok((StatusCheck::Success, reply)) => {
                if let Some(status) = reply.status.as_deref().filter(|s| is_closed_on_server(s)) {
                    warn!(jobid, status, "job is closed on the server, killing payload");
                    kill_payload(ctx, &target).await;
                    fail_job(ctx, job, errorcodes::PANDAKILL, format!("job {status} on the server"));
                    return;
                }
            }
            Ok((check, _)) => debug!(jobid, ?check, "status check gave no answer"),
            Err(e) => debug!(jobid, error = %e, "status check failed"),
        }
    }

    let code = ctx.collab.probe.probe(&target).await;
    match ctx.codes.classify(code) {
        ProbeClass::Healthy => heartbeat_if_due(ctx, job).await,
        ProbeClass::NearExpiry => {
            info!(jobid, code, "proxy about to expire, refreshing");
            if ctx.collab.proxy.refresh().await {
                heartbeat_if_due(ctx, job).await;
            } else {
                fail_job(ctx, job, code, errorcodes::diagnostic(code));
            }
        }
        ProbeClass::KillNow => {
            warn!(jobid, code, "probe asks for the payload to be killed");
            kill_payload(ctx, &target).await;
            fail_job(ctx, job, code, errorcodes::diagnostic(code));
        }
        ProbeClass::LeaseExpired if ctx.config.pilot.workflow == Workflow::Stager => {
            info!(jobid, "lease expired, staging out the log and finishing");
            kill_payload(ctx, &target).await;
            job.lock().log_only_stageout = true;
            if ctx.queues.monitored_payloads.remove_job(jobid).is_none() {
                debug!(jobid, "job already left the monitor");
                return;
            }
            ctx.queues.data_out.put(job.clone());
            wait_for_log_transfer(ctx, job, jobid).await;
            {
                let mut j = job.lock();
                if j.timings.payload_end.is_none() {
                    j.timings.payload_end = Some(Utc::now());
                }
                j.set_state(JobState::Finished);
            }
            ctx.queues.finished_jobs.put(job.clone());
        }
        ProbeClass::LeaseExpired | ProbeClass::Fatal => {
            warn!(jobid, code, "health probe failed");
            fail_job(ctx, job, code, errorcodes::diagnostic(code));
        }
    }
}

async fn kill_payload(ctx: &StageContext, target: &PayloadTarget) {
    if let Err(e) = ctx.collab.process.kill_payload(target).await {
        warn!(jobid = %target.jobid, error = %e, "could not kill payload");
    }
}

/// Mark the job failed with `code` and hand it to `failed_payloads`.
/// The job is not probed again.
pub fn fail_job(ctx: &StageContext, job: &SharedJob, code: i32, diag: impl Into<String>) {
    let jobid = {
        let mut j = job.lock();
        if !j.set_state(JobState::Failed) {
            j.force_failed();
        }
        j.add_error(code, diag);
        if j.timings.payload_end.is_none() && j.timings.payload_start.is_some() {
            j.timings.payload_end = Some(Utc::now());
        }
        j.jobid.clone()
    };
    ctx.traces.set_error_code(code);
    if ctx.queues.monitored_payloads.remove_job(&jobid).is_some() {
        ctx.queues.failed_payloads.put(job.clone());
    } else {
        debug!(jobid, "job already left monitoring");
    }
}
