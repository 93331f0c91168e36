// src/engine/supervisor.rs

//! Control supervisor: starts the stages, collects their failures and
//! arbitrates shutdown.
//!
//! Every stage runs in its own tokio task. A stage that returns an error
//! or panics reports a [`StageFailure`] on the supervisor's channel, which
//! turns into a graceful stop for the whole pilot. Once the stop is
//! requested the remaining stages get [`SHUTDOWN_GRACE`] to finish their
//! job (final update included) before they are aborted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::StageContext;
use crate::errors::Result;

/// How long stages may keep running after a graceful stop.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: &'static str,
    pub message: String,
}

/// Outcome of a pilot run.
#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub failures: Vec<StageFailure>,
    /// Last pilot error code recorded in the traces.
    pub error_code: i32,
    pub kill_signal: Option<String>,
    pub jobs: u32,
    /// Stages that had to be aborted at the end of the grace period.
    pub aborted: Vec<&'static str>,
}

impl SupervisorReport {
    /// Process exit code: 128 + signal number after a kill signal, 1 after a
    /// stage failure, otherwise 0.
    pub fn exit_code(&self) -> i32 {
        if let Some(signal) = &self.kill_signal {
            return 128
                + match signal.as_str() {
                    "SIGINT" => 2,
                    "SIGQUIT" => 3,
                    "SIGUSR1" => 10,
                    _ => 15,
                };
        }
        if self.failures.is_empty() && self.aborted.is_empty() {
            0
        } else {
            1
        }
    }
}

struct StageHandle {
    name: &'static str,
    task: AbortHandle,
    watcher: JoinHandle<()>,
}

pub struct Supervisor {
    ctx: Arc<StageContext>,
    stages: Vec<StageHandle>,
    failure_tx: mpsc::UnboundedSender<StageFailure>,
    failure_rx: mpsc::UnboundedReceiver<StageFailure>,
    grace: Duration,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.stages.iter().map(|s| s.name).collect();
        f.debug_struct("Supervisor")
            .field("stages", &names)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            stages: Vec::new(),
            failure_tx,
            failure_rx,
            grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.ctx
    }

    /// Start a stage. Its error or panic is reported as a [`StageFailure`].
    pub fn spawn<F>(&mut self, name: &'static str, stage: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = tokio::spawn(stage);
        let abort = task.abort_handle();
        let tx = self.failure_tx.clone();
        let watcher = tokio::spawn(async move {
            let message = match task.await {
                Ok(Ok(())) => {
                    debug!(stage = name, "stage exited");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => format!("stage panicked: {e}"),
                Err(e) if e.is_cancelled() => return,
                Err(e) => e.to_string(),
            };
            let _ = tx.send(StageFailure { stage: name, message });
        });
        debug!(stage = name, "stage started");
        self.stages.push(StageHandle { name, task: abort, watcher });
    }

    /// Wait for every stage to exit.
    pub async fn run(self) -> SupervisorReport {
        let Supervisor {
            ctx,
            stages,
            failure_tx,
            mut failure_rx,
            grace,
        } = self;
        drop(failure_tx);
        info!(stages = stages.len(), "supervisor running");

        let stop = ctx.flags.stop_token();
        let mut report = SupervisorReport::default();
        let mut deadline: Option<Instant> = None;

        loop {
            let grace_over = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                failure = failure_rx.recv() => match failure {
                    Some(failure) => {
                        error!(stage = failure.stage, error = %failure.message, "stage failed");
                        ctx.flags.request_graceful_stop(&format!("stage {} failed", failure.stage));
                        report.failures.push(failure);
                    }
                    None => break,
                },
                _ = stop.cancelled(), if deadline.is_none() => {
                    info!(grace_secs = grace.as_secs(), "graceful stop requested, waiting for stages");
                    deadline = Some(Instant::now() + grace);
                }
                _ = grace_over => {
                    for stage in stages.iter().filter(|s| !s.watcher.is_finished()) {
                        warn!(stage = stage.name, "stage did not stop in time, aborting");
                        stage.task.abort();
                        report.aborted.push(stage.name);
                    }
                    break;
                }
            }
        }

        for stage in stages {
            let _ = stage.watcher.await;
        }
        while let Ok(failure) = failure_rx.try_recv() {
            report.failures.push(failure);
        }

        report.error_code = ctx.traces.error_code();
        report.kill_signal = ctx.flags.kill_signal().map(|s| s.name);
        report.jobs = ctx.traces.nr_jobs();
        info!(
            jobs = report.jobs,
            failures = report.failures.len(),
            error_code = report.error_code,
            "supervisor finished"
        );
        report
    }
}
