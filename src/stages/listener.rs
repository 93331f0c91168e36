// src/stages/listener.rs

//! Optional message listener for pilots fed through a message broker.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::engine::{StageContext, QUEUE_TIMEOUT};
use crate::errors::{PilotError, Result};
use crate::job::definition::value_to_string;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMessage {
    /// Ask the dispatcher for a job of this task.
    GetJob { taskid: Option<String> },
    KillTask { taskid: Option<String> },
    /// Finish the current job, then stop asking for more.
    FinishTask { taskid: Option<String> },
}

impl BrokerMessage {
    /// Parse `{"msg_type": ..., "taskid": ...}`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let msg_type = value
            .get("msg_type")
            .and_then(Value::as_str)
            .ok_or_else(|| PilotError::Dispatcher(format!("broker message without msg_type: {raw}")))?;
        let taskid = value.get("taskid").and_then(value_to_string);
        match msg_type {
            "get_job" => Ok(BrokerMessage::GetJob { taskid }),
            "kill_task" => Ok(BrokerMessage::KillTask { taskid }),
            "finish_task" => Ok(BrokerMessage::FinishTask { taskid }),
            other => Err(PilotError::Dispatcher(format!("unknown broker message type '{other}'"))),
        }
    }
}

/// Source of raw broker messages.
pub trait MessageBroker: Send + Sync + Debug {
    /// Wait up to `timeout` for the next message. `None` on timeout or
    /// when the broker is gone.
    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Option<String>>;
}

/// In-process broker backed by an mpsc channel.
#[derive(Debug)]
pub struct ChannelBroker {
    rx: Mutex<mpsc::Receiver<String>>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx: Mutex::new(rx) })
    }
}

impl MessageBroker for ChannelBroker {
    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
        })
    }
}

/// Broker fed with one JSON message per line on stdin, for sites that
/// bridge their publish/subscribe connection through a pipe.
#[derive(Debug)]
pub struct StdinBroker {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinBroker {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBroker for StdinBroker {
    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let mut lines = self.lines.lock().await;
            match tokio::time::timeout(timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) if !line.trim().is_empty() => Some(line),
                Ok(Ok(None)) => {
                    // stdin closed; keep the caller's pace
                    tokio::time::sleep(timeout).await;
                    None
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "cannot read broker message from stdin");
                    None
                }
                _ => None,
            }
        })
    }
}

/// Forward broker messages until graceful stop.
pub async fn run(ctx: Arc<StageContext>, broker: Arc<dyn MessageBroker>) -> Result<()> {
    info!("message listener started");
    while !ctx.flags.is_graceful_stop() {
        let stop = ctx.flags.stop_token();
        let raw = tokio::select! {
            _ = stop.cancelled() => break,
            raw = broker.receive(QUEUE_TIMEOUT) => raw,
        };
        let Some(raw) = raw else {
            continue;
        };

        match BrokerMessage::parse(&raw) {
            Ok(message) => handle_message(&ctx, message),
            Err(e) => warn!(error = %e, "ignoring broker message"),
        }
    }
    info!("message listener finished");
    Ok(())
}

fn handle_message(ctx: &StageContext, message: BrokerMessage) {
    debug!(?message, "broker message received");
    match message {
        BrokerMessage::GetJob { .. } => ctx.queues.messages.put(message),
        BrokerMessage::KillTask { taskid } => {
            warn!(?taskid, "task killed through the broker");
            ctx.flags.request_abort();
            ctx.flags.request_graceful_stop("kill_task message");
        }
        BrokerMessage::FinishTask { taskid } => {
            info!(?taskid, "task finishing, no further jobs will be requested");
            ctx.flags.request_wrap_up();
        }
    }
}
