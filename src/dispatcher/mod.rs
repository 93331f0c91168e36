// src/dispatcher/mod.rs

//! The dispatcher wire contract.
//!
//! Three operations are used: `getJob`, `updateJob` and `getStatus`. Each
//! takes form parameters and answers with a key/value map (JSON, or
//! URL-encoded pairs from older servers). [`HttpDispatcher`] talks to a
//! real server; tests plug in a fake through the [`Dispatcher`] trait.

pub mod http;
pub mod request;
pub mod status;

use crate::BoxFuture;
use crate::errors::Result;
use crate::job::JobDefinition;
use crate::job::definition::value_to_string;

pub use http::HttpDispatcher;
pub use request::build_getjob_params;
pub use status::{StatusCheck, query_job_status};

/// Ordered form parameters of a request.
pub type Params = Vec<(String, String)>;

/// Decoded `updateJob` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReply {
    pub status_code: i64,
    /// Backchannel command, `None` when absent or `NULL`.
    pub command: Option<String>,
    pub pilot_secrets: Option<String>,
}

impl UpdateReply {
    pub fn from_map(reply: &JobDefinition) -> Self {
        let command = reply
            .get_str("command")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && c != "NULL");
        let pilot_secrets = reply
            .0
            .get("pilotSecrets")
            .and_then(value_to_string)
            .filter(|s| !s.is_empty());
        Self {
            status_code: reply.status_code(),
            command,
            pilot_secrets,
        }
    }
}

/// Decoded `getStatus` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReply {
    pub status_code: i64,
    pub status: Option<String>,
    pub attempt_nr: Option<u32>,
}

impl StatusReply {
    pub fn from_map(reply: &JobDefinition) -> Self {
        Self {
            status_code: reply.status_code(),
            status: reply.get_str("status"),
            attempt_nr: reply.get_u32("attemptNr"),
        }
    }
}

/// Transport to the job dispatcher.
pub trait Dispatcher: Send + Sync + std::fmt::Debug {
    /// Ask for a job. A reply with a non-zero `StatusCode` means "no job".
    fn get_job(&self, params: Params) -> BoxFuture<'_, Result<JobDefinition>>;

    fn update_job(&self, params: Params) -> BoxFuture<'_, Result<UpdateReply>>;

    fn get_status<'a>(&'a self, jobid: &'a str) -> BoxFuture<'a, Result<StatusReply>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::definition::decode_response_body;

    #[test]
    fn null_command_is_no_command() {
        let reply = decode_response_body(r#"{"StatusCode": 0, "command": "NULL"}"#).unwrap();
        assert_eq!(UpdateReply::from_map(&reply).command, None);
    }

    #[test]
    fn update_reply_from_urlencoded_body() {
        let reply = decode_response_body("StatusCode=0&command=tobekilled").unwrap();
        let update = UpdateReply::from_map(&reply);
        assert_eq!(update.status_code, 0);
        assert_eq!(update.command.as_deref(), Some("tobekilled"));
    }

    #[test]
    fn status_reply_reads_attempt() {
        let reply =
            decode_response_body(r#"{"StatusCode": 0, "status": "running", "attemptNr": 2}"#)
                .unwrap();
        let status = StatusReply::from_map(&reply);
        assert_eq!(status.status.as_deref(), Some("running"));
        assert_eq!(status.attempt_nr, Some(2));
    }
}
