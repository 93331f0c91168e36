// src/heartbeat/mod.rs

//! Job state updates sent to the dispatcher.
//!
//! [`send_state`] is the single entry point: it resolves the state the
//! server should see, settles error codes for final updates, builds the
//! request, sends it (or stores it locally when server updates are off) and
//! applies any commands that come back with the reply.

pub mod backchannel;
pub mod cadence;
pub mod debug;
pub mod payload;
pub mod reconcile;
pub mod state;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dispatcher::UpdateReply;
use crate::engine::{ServerUpdate, StageContext};
use crate::exec::backend::PayloadTarget;
use crate::job::{errorcodes, SharedJob};
use crate::types::{JobState, ServerState, Workflow};

pub use backchannel::{parse_command, BackchannelCommand};
pub use cadence::is_heartbeat_due;
pub use payload::{build_update_params, UpdateExtras};
pub use reconcile::verify_error_code;
pub use state::get_proper_state;

/// File the update is written to when server updates are turned off.
pub const LOCAL_HEARTBEAT_FILE: &str = "heartbeat.json";
pub const PILOT_SECRETS_FILE: &str = "pilot_secrets.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Accepted by the dispatcher.
    Sent,
    /// Written to the local report files.
    Stored,
    Failed,
}

impl UpdateOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, UpdateOutcome::Failed)
    }
}

fn job_state_for(state: ServerState) -> JobState {
    match state {
        ServerState::Finished => JobState::Finished,
        ServerState::Failed => JobState::Failed,
        ServerState::Holding => JobState::Holding,
        ServerState::Starting => JobState::Starting,
        ServerState::Running | ServerState::Unset => JobState::Running,
    }
}

/// Report `state` for `job`.
pub async fn send_state(ctx: &StageContext, job: &SharedJob, state: JobState) -> UpdateOutcome {
    let (resolved, snapshot) = {
        let mut job = job.lock();
        let mut resolved = get_proper_state(job.server_state, state);
        if resolved.is_final() {
            if job.has_pending_error() && resolved != ServerState::Failed {
                warn!(jobid = %job.jobid, code = job.piloterrorcode, state = %resolved, "job has an error, reporting it as failed");
                job.force_failed();
                resolved = ServerState::Failed;
            }
            if resolved != ServerState::Finished {
                verify_error_code(&mut job, &ctx.codes);
                if job.state == JobState::Failed {
                    resolved = ServerState::Failed;
                }
            }
        }
        job.last_heartbeat = Some(Instant::now());
        (resolved, job.clone())
    };
    let is_final = resolved.is_final();
    let jobid = snapshot.jobid.as_str();

    ctx.flags.set_server_update(if is_final {
        ServerUpdate::UpdatingFinal
    } else {
        ServerUpdate::Running
    });
    ctx.traces.set_state(resolved.as_str());

    let params = build_update_params(
        &ctx.config,
        &ctx.node,
        &snapshot,
        resolved,
        gather_extras(ctx, &snapshot, resolved).await,
        Utc::now(),
    );
    debug!(jobid, state = %resolved, "sending job update");

    let outcome = if !ctx.config.pilot.update_server {
        store_locally(ctx, jobid, &params)
    } else {
        match ctx.dispatcher.update_job(params).await {
            Ok(reply) if reply.status_code == 0 => {
                apply_backchannel(ctx, job, &reply).await;
                UpdateOutcome::Sent
            }
            Ok(reply) => {
                warn!(jobid, status_code = reply.status_code, "dispatcher rejected job update");
                UpdateOutcome::Failed
            }
            Err(e) => {
                warn!(jobid, error = %e, "job update failed");
                UpdateOutcome::Failed
            }
        }
    };

    if outcome.is_success() {
        let mut job = job.lock();
        job.server_state = resolved;
        if is_final && job.mark_completed() {
            info!(jobid, state = %resolved, "final job update accepted");
        }
        drop(job);
        if is_final {
            ctx.flags.set_server_update(ServerUpdate::FinalDone);
        }
    } else if is_final {
        error!(jobid, state = %resolved, "final job update failed, job not marked completed");
        ctx.flags.set_server_update(ServerUpdate::FinalFailed);
    }

    outcome
}

async fn gather_extras(
    ctx: &StageContext,
    job: &crate::job::Job,
    resolved: ServerState,
) -> UpdateExtras {
    let mut extras = UpdateExtras::default();
    if let Some(workdir) = job.workdir.as_deref() {
        if job.debug {
            extras.stdout = debug::debug_output(
                job.debug_command.as_deref(),
                workdir,
                &ctx.payload_stdout(workdir),
                ctx.config.heartbeat.debug_output_limit,
            )
            .await;
        }
        if resolved.is_final() {
            extras.metadata = ctx.site.get_metadata(ctx.fs.as_ref(), workdir);
        }
    }
    if resolved.is_final() {
        extras.pilot_log = ctx.site.log_extracts(
            ctx.fs.as_ref(),
            job,
            job_state_for(resolved),
            &ctx.pilot_log_path(),
        );
    }
    extras
}

fn store_locally(ctx: &StageContext, jobid: &str, params: &crate::dispatcher::Params) -> UpdateOutcome {
    let body = match serde_json::to_vec_pretty(&payload::params_to_json(params)) {
        Ok(body) => body,
        Err(e) => {
            warn!(jobid, error = %e, "cannot serialize job update");
            return UpdateOutcome::Failed;
        }
    };

    let primary = ctx.config.pilot.pilot_home.join(LOCAL_HEARTBEAT_FILE);
    let mut outcome = UpdateOutcome::Stored;
    for path in std::iter::once(&primary).chain(ctx.config.pilot.report_files.iter()) {
        if let Err(e) = ctx.fs.write(path, &body) {
            warn!(jobid, path = %path.display(), error = %e, "cannot write job update");
            outcome = UpdateOutcome::Failed;
        }
    }
    if outcome.is_success() {
        debug!(jobid, path = %primary.display(), "job update stored locally");
    }
    outcome
}

/// Act on the `command` and `pilotSecrets` fields of an update reply.
pub async fn apply_backchannel(ctx: &StageContext, job: &SharedJob, reply: &UpdateReply) {
    if let Some(secrets) = &reply.pilot_secrets {
        let path = ctx.config.pilot.pilot_home.join(PILOT_SECRETS_FILE);
        match ctx.fs.write(&path, secrets.as_bytes()) {
            Ok(()) => debug!(path = %path.display(), "stored pilot secrets"),
            Err(e) => warn!(error = %e, "cannot store pilot secrets"),
        }
    }

    let Some(raw) = reply.command.as_deref() else {
        return;
    };
    ctx.traces.set_command(raw);

    for command in parse_command(raw) {
        match command {
            BackchannelCommand::ToBeKilled => handle_kill_request(ctx, job).await,
            other => {
                let mut job = job.lock();
                let jobid = job.jobid.clone();
                match other {
                    BackchannelCommand::Debug(cmd) => {
                        info!(jobid, command = %cmd, "debug mode on with command");
                        job.debug = true;
                        job.debug_command = Some(cmd);
                    }
                    BackchannelCommand::RejectedDebug(cmd) => {
                        warn!(jobid, command = %cmd, "rejected debug command");
                        job.debug = false;
                        job.debug_command = None;
                    }
                    BackchannelCommand::DebugOn => {
                        info!(jobid, "debug mode on");
                        job.debug = true;
                    }
                    BackchannelCommand::DebugOff => {
                        info!(jobid, "debug mode off");
                        job.debug = false;
                        job.debug_command = None;
                    }
                    BackchannelCommand::SoftKill => {
                        info!(jobid, "soft kill requested");
                        job.es_command = Some("softkill".to_string());
                    }
                    BackchannelCommand::NoCleanup => {
                        info!(jobid, "workdir cleanup turned off");
                        job.cleanup = false;
                    }
                    BackchannelCommand::Unknown(token) => {
                        warn!(jobid, command = %token, "ignoring unknown server command");
                    }
                    BackchannelCommand::ToBeKilled => {}
                }
            }
        }
    }
}

async fn handle_kill_request(ctx: &StageContext, job: &SharedJob) {
    let stager = ctx.config.pilot.workflow == Workflow::Stager;
    let target = {
        let mut job = job.lock();
        if let Some(workdir) = &job.workdir {
            if !ctx.fs.is_dir(workdir) {
                info!(jobid = %job.jobid, "kill request for a job whose workdir is gone, ignoring");
                return;
            }
        }
        warn!(jobid = %job.jobid, "dispatcher asked to kill the job");
        if stager {
            job.set_state(JobState::Finished);
        } else {
            job.add_error(errorcodes::PANDAKILL, errorcodes::diagnostic(errorcodes::PANDAKILL));
            if !job.set_state(JobState::Failed) {
                job.force_failed();
            }
        }
        PayloadTarget::from_job(&job)
    };

    ctx.traces.set_error_code(errorcodes::PANDAKILL);
    ctx.flags.request_abort();

    if target.pid.is_some() || target.pgrp.is_some() {
        if let Err(e) = ctx.collab.process.kill_payload(&target).await {
            warn!(jobid = %target.jobid, error = %e, "could not kill payload");
        }
    }
}
