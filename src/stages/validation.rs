// src/stages/validation.rs

//! Validation: site checks and job working directory setup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{StageContext, QUEUE_TIMEOUT};
use crate::errors::Result;
use crate::job::{errorcodes, SharedJob};
use crate::types::{JobState, QueueType, SubmitMode};

/// Secrets shipped with a job are moved into this file in its workdir.
pub const JOB_SECRETS_FILE: &str = "panda_secrets.json";
/// Every job id the pilot worked on, one per line, under the pilot home.
pub const JOBIDS_FILE: &str = "pandaIDs.out";

pub async fn run(ctx: Arc<StageContext>) -> Result<()> {
    info!("validation started");
    while ctx.keep_running() {
        let Some(job) = ctx.queues.jobs.get(QUEUE_TIMEOUT).await else {
            continue;
        };
        ctx.traces.increment_nr_jobs();

        match validate(&ctx, &job).await {
            Ok(()) => ctx.queues.validated_jobs.put(job),
            Err((code, diag)) => {
                let jobid = {
                    let mut j = job.lock();
                    j.set_state(JobState::Failed);
                    j.add_error(code, diag.clone());
                    j.jobid.clone()
                };
                warn!(jobid, code, diag, "job failed validation");
                ctx.traces.set_error_code(code);
                ctx.queues.failed_jobs.put(job);
            }
        }
    }
    info!("validation finished");
    Ok(())
}

/// Validate one job and prepare its working directory.
async fn validate(ctx: &StageContext, job: &SharedJob) -> std::result::Result<(), (i32, String)> {
    let (jobid, secrets, production) = {
        let mut j = job.lock();
        j.use_container = ctx.site.do_use_container(&j);
        ctx.site
            .validate_job(&j)
            .map_err(|r| (r.code, r.diag))?;
        (j.jobid.clone(), j.secrets.clone(), j.is_production())
    };
    debug!(jobid, "job passed site validation");

    let workdir = ctx.job_workdir(&jobid);
    ctx.fs.create_dir(&workdir).map_err(|e| {
        (
            errorcodes::MKDIR,
            format!("cannot create working directory {}: {e}", workdir.display()),
        )
    })?;
    job.lock().workdir = Some(workdir.clone());

    let link = workdir.join(&ctx.config.pilot.pilot_log);
    if let Err(e) = ctx.fs.symlink(&ctx.pilot_log_path(), &link) {
        debug!(jobid, error = %e, "cannot symlink pilot log");
    }

    if let Some(secrets) = secrets {
        let path = workdir.join(JOB_SECRETS_FILE);
        ctx.fs.write(&path, secrets.as_bytes()).map_err(|e| {
            (errorcodes::SECRETS, format!("cannot store job secrets: {e}"))
        })?;
        job.lock().secrets = None;
        debug!(jobid, "job secrets isolated");
    }

    if ctx.config.pilot.queue_type == QueueType::Unified
        && !production
        && !ctx.collab.proxy.replace_for_job(&jobid).await
    {
        return Err((
            errorcodes::PROXYREPLACEMENT,
            errorcodes::diagnostic(errorcodes::PROXYREPLACEMENT).to_string(),
        ));
    }

    if let Err(e) = ctx.site.pre_cleanup(ctx.fs.as_ref(), &workdir) {
        warn!(jobid, error = %e, "pre-execution cleanup failed");
    }

    let ids_file = ctx.config.pilot.pilot_home.join(JOBIDS_FILE);
    if let Err(e) = ctx.fs.append(&ids_file, format!("{jobid}\n").as_bytes()) {
        warn!(jobid, error = %e, "cannot record job id");
    }

    if ctx.config.pilot.submit_mode == SubmitMode::Push {
        let code = ctx.collab.disk.check(&ctx.config.pilot.workdir);
        if code != 0 {
            return Err((code, errorcodes::diagnostic(code).to_string()));
        }
    }

    info!(jobid, workdir = %workdir.display(), "job validated");
    Ok(())
}
