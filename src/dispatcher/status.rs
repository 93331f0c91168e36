// src/dispatcher/status.rs

use std::time::Duration;

use tracing::{info, warn};

use crate::errors::Result;

use super::{Dispatcher, StatusReply};

/// Wait before repeating a `getStatus` that timed out on the server side.
pub const STATUS_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Meaning of the `StatusCode` of a `getStatus` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    Success,
    Timeout,
    GeneralError,
    Failed,
    Unknown(i64),
}

impl From<i64> for StatusCheck {
    fn from(code: i64) -> Self {
        match code {
            0 => StatusCheck::Success,
            10 => StatusCheck::Timeout,
            20 => StatusCheck::GeneralError,
            30 => StatusCheck::Failed,
            other => StatusCheck::Unknown(other),
        }
    }
}

/// Ask the dispatcher for the server-side status of `jobid`.
///
/// A server-side timeout is retried once after [`STATUS_RETRY_DELAY`].
pub async fn query_job_status(
    dispatcher: &dyn Dispatcher,
    jobid: &str,
) -> Result<(StatusCheck, StatusReply)> {
    let reply = dispatcher.get_status(jobid).await?;
    let check = StatusCheck::from(reply.status_code);
    if check != StatusCheck::Timeout {
        return Ok((check, reply));
    }

    warn!(jobid, "status query timed out on the server, retrying once");
    tokio::time::sleep(STATUS_RETRY_DELAY).await;
    let reply = dispatcher.get_status(jobid).await?;
    let check = StatusCheck::from(reply.status_code);
    info!(jobid, ?check, status = ?reply.status, "status query retried");
    Ok((check, reply))
}

/// Server-side states after which the payload must not keep running.
pub fn is_closed_on_server(status: &str) -> bool {
    matches!(status, "finished" | "failed" | "cancelled" | "closed")
}
