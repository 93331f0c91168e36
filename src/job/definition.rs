// src/job/definition.rs

//! Job definitions as delivered by the dispatcher or a pre-placed file.

use serde_json::{Map, Value};

use crate::errors::{PilotError, Result};
use crate::job::Job;

/// A raw job definition: the flat key/value map the dispatcher sends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDefinition(pub Map<String, Value>);

impl JobDefinition {
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(value_to_string)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// `StatusCode` of a getJob response, 0 when absent.
    pub fn status_code(&self) -> i64 {
        self.get_str("StatusCode")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn jobid(&self) -> Option<String> {
        self.get_str("PandaID").filter(|id| !id.is_empty())
    }

    /// Build the job entity from this definition.
    pub fn to_job(&self) -> Result<Job> {
        let jobid = self
            .jobid()
            .ok_or_else(|| PilotError::JobDefinition("missing PandaID".to_string()))?;

        let mut job = Job::new(jobid);
        job.taskid = self.get_str("taskID").unwrap_or_default();
        job.attempt_nr = self.get_u32("attemptNr").unwrap_or(0);
        if let Some(label) = self.get_str("prodSourceLabel").filter(|s| !s.is_empty()) {
            job.label = label;
        }
        job.job_type = self
            .get_str("jobType")
            .or_else(|| self.get_str("processingType"))
            .filter(|s| !s.is_empty() && s != "NULL");
        job.transformation = self.get_str("transformation").unwrap_or_default();
        job.job_params = self.get_str("jobPars").unwrap_or_default();
        job.indata = split_file_list(self.get_str("inFiles").as_deref());
        if let Some(cores) = self.get_u32("coreCount").filter(|c| *c > 0) {
            job.corecount = cores;
        }
        job.secrets = self
            .get_str("secrets")
            .or_else(|| self.get_str("pandaSecrets"))
            .filter(|s| !s.is_empty() && s != "NULL");
        Ok(job)
    }
}

/// Comma-separated file list; `NULL` and empty entries are dropped.
fn split_file_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != "NULL")
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decode a response body: JSON object first, URL-encoded pairs otherwise.
pub fn decode_response_body(body: &str) -> Result<JobDefinition> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        let map: Map<String, Value> = serde_json::from_str(trimmed)?;
        return Ok(JobDefinition(map));
    }
    Ok(parse_query_string(trimmed))
}

fn parse_query_string(raw: &str) -> JobDefinition {
    let map = url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    JobDefinition(map)
}

/// Parse the contents of a pre-placed job definition file.
///
/// Accepts a single JSON definition, a JSON list of definitions, a JSON map
/// keyed by job id, or the legacy URL-encoded query string. When several
/// definitions are present the first one is consumed (for a map, the
/// lowest key).
pub fn parse_job_definition_file(contents: &str) -> Result<JobDefinition> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(PilotError::JobDefinition(
            "job definition file is empty".to_string(),
        ));
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed)?;
        return first_definition(value);
    }

    let def = parse_query_string(trimmed);
    if def.jobid().is_none() {
        return Err(PilotError::JobDefinition(
            "query-string job definition has no PandaID".to_string(),
        ));
    }
    Ok(def)
}

fn first_definition(value: Value) -> Result<JobDefinition> {
    match value {
        Value::Object(map) if map.contains_key("PandaID") => Ok(JobDefinition(map)),
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Object(inner) => Some(JobDefinition(inner)),
                _ => None,
            })
            .ok_or_else(|| {
                PilotError::JobDefinition("no job definition found in JSON map".to_string())
            }),
        Value::Array(items) => items
            .into_iter()
            .find_map(|v| match v {
                Value::Object(inner) => Some(JobDefinition(inner)),
                _ => None,
            })
            .ok_or_else(|| {
                PilotError::JobDefinition("no job definition found in JSON list".to_string())
            }),
        _ => Err(PilotError::JobDefinition(
            "job definition must be a JSON object or list".to_string(),
        )),
    }
}
