// src/stages/data_handoff.rs

//! Data handoff: route validated jobs to stage-in and execution.

use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{StageContext, QUEUE_TIMEOUT};
use crate::errors::Result;
use crate::heartbeat::send_state;
use crate::types::{JobState, Workflow};

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("data handoff started");
    while ctx.keep_running() {
        let Some(job) = ctx.queues.validated_jobs.get(QUEUE_TIMEOUT).await else {
            continue;
        };

        let (jobid, has_input) = {
            let mut j = job.lock();
            let has_input = j.has_input_data();
            if has_input {
                j.set_state(JobState::Stagein);
            }
            (j.jobid.clone(), has_input)
        };

        if has_input {
            debug!(jobid, "job has input data, queued for stage-in");
            ctx.queues.data_in.put(job.clone());
        } else {
            debug!(jobid, "job has no input data");
            ctx.queues.finished_data_in.put(job.clone());

            if ctx.config.pilot.workflow == Workflow::Stager {
                info!(jobid, "stager workflow without input, handing the job back");
                send_state(&ctx, &job, JobState::Running).await;
                ctx.flags.clear_active_job();
                ctx.flags.request_graceful_stop("stager workflow handed off the job");
                continue;
            }
        }

        ctx.queues.payloads.put(job);
    }
    info!("data handoff finished");
    Ok(())
}
