use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use jobpilot::BoxFuture;
use jobpilot::dispatcher::{Dispatcher, Params, StatusReply, UpdateReply};
use jobpilot::errors::{PilotError, Result};
use jobpilot::job::JobDefinition;

/// One recorded dispatcher call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetJob(Params),
    UpdateJob(Params),
    GetStatus(String),
}

impl Call {
    pub fn params(&self) -> Option<&Params> {
        match self {
            Call::GetJob(p) | Call::UpdateJob(p) => Some(p),
            Call::GetStatus(_) => None,
        }
    }

    /// Value of a form parameter of this call.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct Script {
    jobs: VecDeque<Result<JobDefinition>>,
    updates: VecDeque<Result<UpdateReply>>,
    statuses: VecDeque<Result<StatusReply>>,
    calls: Vec<Call>,
}

/// A scripted dispatcher that:
/// - records every call with its parameters
/// - answers getJob from a queue of scripted replies, `StatusCode=20` when empty
/// - answers updateJob from a queue, `StatusCode=0` without a command when empty
/// - answers getStatus from a queue, `status=running` when empty
#[derive(Debug, Clone, Default)]
pub struct FakeDispatcher {
    script: Arc<Mutex<Script>>,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_job(&self, definition: JobDefinition) -> &Self {
        self.script.lock().jobs.push_back(Ok(definition));
        self
    }

    pub fn push_no_job(&self, status_code: i64) -> &Self {
        self.script
            .lock()
            .jobs
            .push_back(Ok(definition(json!({ "StatusCode": status_code }))));
        self
    }

    pub fn push_job_error(&self, message: &str) -> &Self {
        self.script
            .lock()
            .jobs
            .push_back(Err(PilotError::Dispatcher(message.to_string())));
        self
    }

    pub fn push_update(&self, reply: UpdateReply) -> &Self {
        self.script.lock().updates.push_back(Ok(reply));
        self
    }

    /// Next update answered with this backchannel command.
    pub fn push_command(&self, command: &str) -> &Self {
        self.push_update(UpdateReply {
            status_code: 0,
            command: Some(command.to_string()),
            pilot_secrets: None,
        })
    }

    pub fn push_update_error(&self, message: &str) -> &Self {
        self.script
            .lock()
            .updates
            .push_back(Err(PilotError::Dispatcher(message.to_string())));
        self
    }

    pub fn push_status(&self, status: &str) -> &Self {
        self.script.lock().statuses.push_back(Ok(StatusReply {
            status_code: 0,
            status: Some(status.to_string()),
            attempt_nr: None,
        }));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn getjob_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::GetJob(_)))
            .count()
    }

    pub fn updates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::UpdateJob(_)))
            .collect()
    }

    /// `state` parameter of every updateJob call, in order.
    pub fn update_states(&self) -> Vec<String> {
        self.updates()
            .iter()
            .filter_map(|c| c.param("state").map(str::to_string))
            .collect()
    }
}

impl Dispatcher for FakeDispatcher {
    fn get_job(&self, params: Params) -> BoxFuture<'_, Result<JobDefinition>> {
        Box::pin(async move {
            let mut script = self.script.lock();
            script.calls.push(Call::GetJob(params));
            script
                .jobs
                .pop_front()
                .unwrap_or_else(|| Ok(definition(json!({ "StatusCode": 20 }))))
        })
    }

    fn update_job(&self, params: Params) -> BoxFuture<'_, Result<UpdateReply>> {
        Box::pin(async move {
            let mut script = self.script.lock();
            script.calls.push(Call::UpdateJob(params));
            script.updates.pop_front().unwrap_or_else(|| Ok(UpdateReply::default()))
        })
    }

    fn get_status<'a>(&'a self, jobid: &'a str) -> BoxFuture<'a, Result<StatusReply>> {
        Box::pin(async move {
            let mut script = self.script.lock();
            script.calls.push(Call::GetStatus(jobid.to_string()));
            script.statuses.pop_front().unwrap_or_else(|| {
                Ok(StatusReply {
                    status_code: 0,
                    status: Some("running".to_string()),
                    attempt_nr: None,
                })
            })
        })
    }
}

/// Build a job definition from a JSON object literal.
pub fn definition(value: Value) -> JobDefinition {
    match value {
        Value::Object(map) => JobDefinition(map),
        _ => JobDefinition(Map::new()),
    }
}

/// A minimal runnable job definition.
pub fn job_definition(jobid: &str, in_files: &[&str]) -> JobDefinition {
    definition(json!({
        "PandaID": jobid,
        "taskID": "100",
        "attemptNr": 1,
        "prodSourceLabel": "managed",
        "transformation": "true",
        "jobPars": "",
        "inFiles": in_files.join(","),
        "coreCount": 1,
    }))
}
