// src/heartbeat/payload.rs

//! The `updateJob` request body.

use chrono::{DateTime, Utc};

use crate::config::model::ConfigFile;
use crate::dispatcher::Params;
use crate::job::{Job, JobTimings};
use crate::types::ServerState;
use crate::workernode::WorkerNode;

/// Longest `pilotLog` the server accepts.
pub const PILOT_LOG_LIMIT: usize = 1024;

/// Pieces of an update that are gathered outside the job record.
#[derive(Debug, Clone, Default)]
pub struct UpdateExtras {
    /// Output of the debug command, already capped.
    pub stdout: Option<String>,
    /// Site log extracts; only sent with final updates.
    pub pilot_log: String,
    pub metadata: Option<String>,
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

fn span(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(s), Some(e)) if e >= s => (e - s).num_seconds(),
        _ => 0,
    }
}

/// `getjob|stagein|payload|stageout|total`, in whole seconds.
pub fn pilot_timing(timings: &JobTimings, now: DateTime<Utc>) -> String {
    let getjob = span(timings.pre_getjob, timings.post_getjob);
    let stagein = span(timings.stagein_start, timings.stagein_end);
    let payload = span(timings.payload_start, timings.payload_end);
    let stageout = span(timings.stageout_start, timings.stageout_end);
    let total = span(timings.pre_getjob, Some(now));
    format!("{getjob}|{stagein}|{payload}|{stageout}|{total}")
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Build the update for `job` in the already resolved `state`.
pub fn build_update_params(
    config: &ConfigFile,
    node: &WorkerNode,
    job: &Job,
    state: ServerState,
    extras: UpdateExtras,
    now: DateTime<Utc>,
) -> Params {
    let pilot = &config.pilot;
    let metrics = &job.metrics;
    let mut params: Params = vec![
        ("jobId".into(), job.jobid.clone()),
        ("taskID".into(), job.taskid.clone()),
        ("state".into(), state.as_str().to_string()),
        ("timestamp".into(), format_timestamp(now)),
        ("siteName".into(), pilot.site.clone()),
        ("node".into(), node.name.clone()),
        ("attemptNr".into(), job.attempt_nr.to_string()),
        (
            "pilotID".into(),
            format!("{}|{}|{}", pilot.pilot_id, pilot.pilot_type, env!("CARGO_PKG_VERSION")),
        ),
        ("pilotTiming".into(), pilot_timing(&job.timings, now)),
        ("cpuConsumptionTime".into(), metrics.cpu_consumption_time.to_string()),
        ("cpuConsumptionUnit".into(), "s".into()),
        ("coreCount".into(), job.corecount.to_string()),
        ("maxRSS".into(), metrics.max_rss.to_string()),
        ("maxVMEM".into(), metrics.max_vmem.to_string()),
        ("maxSWAP".into(), metrics.max_swap.to_string()),
        ("maxPSS".into(), metrics.max_pss.to_string()),
        ("nEvents".into(), metrics.n_events.to_string()),
        ("nEventsW".into(), metrics.n_events_w.to_string()),
    ];

    if let Some(scheduler_id) = &pilot.scheduler_id {
        params.push(("schedulerID".into(), scheduler_id.clone()));
    }
    if let Some(batch_id) = &node.batch_id {
        params.push(("batchID".into(), batch_id.clone()));
    }
    if let Some(start) = job.timings.payload_start {
        params.push(("startTime".into(), format_timestamp(start)));
    }
    if let Some(stdout) = extras.stdout {
        params.push(("stdout".into(), stdout));
    }

    if state.is_final() {
        params.push(("endTime".into(), format_timestamp(now)));
        params.push(("exeErrorCode".into(), job.exe_error_code.to_string()));
        params.push(("pilotErrorCode".into(), job.piloterrorcode.to_string()));
        params.push(("pilotErrorDiag".into(), job.piloterrordiag.clone()));
        params.push(("pilotLog".into(), truncate_chars(&extras.pilot_log, PILOT_LOG_LIMIT)));
        if let Some(metadata) = extras.metadata {
            params.push(("metaData".into(), metadata));
        }
    }

    params
}

/// The update as a JSON object, for local reports.
pub fn params_to_json(params: &Params) -> serde_json::Value {
    let map = params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map)
}
