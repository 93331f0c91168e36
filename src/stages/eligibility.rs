// src/stages/eligibility.rs

//! Whether the pilot may ask for another job.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{StageContext, WrapUp};
use crate::job::errorcodes;
use crate::types::SubmitMode;

/// Per-pilot acquisition bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionCounters {
    /// Requests made for the current job slot, including the pending one.
    pub getjob_requests: u32,
    pub getjob_failures: u32,
    /// Jobs that ran to completion so far.
    pub jobs_done: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Stop { reason: String, code: Option<i32> },
}

impl GateDecision {
    fn stop(reason: impl Into<String>, code: Option<i32>) -> Self {
        GateDecision::Stop {
            reason: reason.into(),
            code,
        }
    }
}

/// Time floor in effect, honouring the site policy.
pub fn effective_timefloor(ctx: &StageContext) -> Duration {
    let submit_mode = ctx.config.pilot.submit_mode;
    if ctx.site.allow_timefloor(submit_mode) {
        Duration::from_secs(ctx.config.pilot.timefloor * 60)
    } else {
        Duration::ZERO
    }
}

/// The time-budget part of the gate.
///
/// The first job is always allowed. After that, a zero time floor means a
/// single job per pilot; otherwise new jobs may start until the time floor
/// has passed since the pilot started.
pub fn within_time_budget(timefloor: Duration, elapsed: Duration, jobs_done: u32) -> bool {
    if jobs_done == 0 {
        return true;
    }
    if timefloor.is_zero() {
        return false;
    }
    elapsed <= timefloor
}

/// Run every check that must pass before a getJob request.
pub async fn proceed_with_getjob(ctx: &StageContext, counters: &AcquisitionCounters) -> GateDecision {
    if ctx.flags.wrap_up() == WrapUp::Requested {
        return GateDecision::stop("wrap-up requested", None);
    }

    let timefloor = effective_timefloor(ctx);
    let elapsed = Instant::now().saturating_duration_since(ctx.flags.pilot_start());
    if !within_time_budget(timefloor, elapsed, counters.jobs_done) {
        let reason = if timefloor.is_zero() {
            "only one job is allowed without a time floor".to_string()
        } else {
            format!("time floor of {}s exceeded after {}s", timefloor.as_secs(), elapsed.as_secs())
        };
        return GateDecision::stop(reason, None);
    }

    if ctx.config.pilot.verify_proxy {
        let code = ctx.collab.proxy.verify().await;
        if code != 0 {
            if errorcodes::is_fatal_proxy_code(code) {
                warn!(code, "proxy is not usable");
                return GateDecision::stop(errorcodes::diagnostic(code), Some(code));
            }
            info!(code, "proxy needs attention, trying a refresh");
            if !ctx.collab.proxy.refresh().await {
                return GateDecision::stop("proxy refresh failed", Some(code));
            }
        }
    } else {
        debug!("proxy verification disabled");
    }

    // In push mode the job is already known and the check moves to validation.
    if ctx.config.pilot.submit_mode == SubmitMode::Pull {
        let code = ctx.collab.disk.check(&ctx.config.pilot.workdir);
        if code != 0 {
            return GateDecision::stop(errorcodes::diagnostic(code), Some(code));
        }
    }

    let max_requests = ctx.config.effective_max_getjob_requests();
    if counters.getjob_requests > max_requests {
        ctx.traces.set_error_code(errorcodes::GETJOBREQUESTS);
        return GateDecision::stop(
            format!("reached the maximum number of getJob requests ({max_requests})"),
            Some(errorcodes::GETJOBREQUESTS),
        );
    }

    if ctx.flags.final_update_in_flight() {
        return GateDecision::stop("a final job update is still in flight", None);
    }

    GateDecision::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn first_job_is_always_allowed() {
        assert!(within_time_budget(Duration::ZERO, MIN * 100, 0));
    }

    #[test]
    fn zero_timefloor_means_one_job() {
        assert!(!within_time_budget(Duration::ZERO, Duration::ZERO, 1));
    }

    #[test]
    fn timefloor_bounds_later_jobs() {
        assert!(within_time_budget(MIN * 60, MIN * 30, 3));
        assert!(!within_time_budget(MIN * 60, MIN * 61, 3));
    }
}
