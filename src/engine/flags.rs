// src/engine/flags.rs

//! Process-wide control flags shared by every stage, and the trace record.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where the pilot is with respect to job updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerUpdate {
    #[default]
    Idle,
    Running,
    /// A final (terminal) update is in flight.
    UpdatingFinal,
    FinalDone,
    FinalFailed,
}

/// Whether the pilot should stop asking for more work once the current job ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapUp {
    #[default]
    Normal,
    Requested,
}

#[derive(Debug, Clone)]
pub struct KillSignal {
    pub name: String,
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ControlFlags {
    graceful_stop: CancellationToken,
    abort_job: AtomicBool,
    job_aborted: AtomicBool,
    kill_signal: Mutex<Option<KillSignal>>,
    server_update: Mutex<ServerUpdate>,
    wrap_up: Mutex<WrapUp>,
    /// Job currently owned by the pipeline, from acquisition to completion.
    active_job: Mutex<Option<String>>,
    pilot_start: Instant,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self {
            graceful_stop: CancellationToken::new(),
            abort_job: AtomicBool::new(false),
            job_aborted: AtomicBool::new(false),
            kill_signal: Mutex::new(None),
            server_update: Mutex::new(ServerUpdate::Idle),
            wrap_up: Mutex::new(WrapUp::Normal),
            active_job: Mutex::new(None),
            pilot_start: Instant::now(),
        }
    }

    /// A handle on the stop token. Once cancelled it stays cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.graceful_stop.clone()
    }

    pub fn request_graceful_stop(&self, reason: &str) {
        if !self.graceful_stop.is_cancelled() {
            info!(reason, "graceful stop requested");
        }
        self.graceful_stop.cancel();
    }

    pub fn is_graceful_stop(&self) -> bool {
        self.graceful_stop.is_cancelled()
    }

    pub fn request_abort(&self) {
        self.abort_job.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_job.load(Ordering::SeqCst)
    }

    /// Acknowledge that the current job has been aborted.
    pub fn acknowledge_abort(&self) {
        self.job_aborted.store(true, Ordering::SeqCst);
    }

    pub fn job_aborted(&self) -> bool {
        self.job_aborted.load(Ordering::SeqCst)
    }

    /// Clear `abort_job` and `job_aborted` together at the job-slot boundary.
    pub fn reset_job_slot(&self) {
        self.abort_job.store(false, Ordering::SeqCst);
        self.job_aborted.store(false, Ordering::SeqCst);
    }

    pub fn record_kill_signal(&self, name: &str) {
        let mut slot = self.kill_signal.lock();
        if let Some(existing) = slot.as_ref() {
            warn!(signal = name, first = %existing.name, "kill signal received again");
            return;
        }
        *slot = Some(KillSignal {
            name: name.to_string(),
            at: Instant::now(),
            wall: Utc::now(),
        });
    }

    pub fn kill_signal(&self) -> Option<KillSignal> {
        self.kill_signal.lock().clone()
    }

    pub fn since_kill_signal(&self) -> Option<Duration> {
        self.kill_signal.lock().as_ref().map(|k| k.at.elapsed())
    }

    pub fn server_update(&self) -> ServerUpdate {
        *self.server_update.lock()
    }

    pub fn set_server_update(&self, state: ServerUpdate) {
        *self.server_update.lock() = state;
    }

    pub fn final_update_in_flight(&self) -> bool {
        self.server_update() == ServerUpdate::UpdatingFinal
    }

    pub fn request_wrap_up(&self) {
        *self.wrap_up.lock() = WrapUp::Requested;
    }

    pub fn wrap_up(&self) -> WrapUp {
        *self.wrap_up.lock()
    }

    pub fn set_active_job(&self, jobid: &str) {
        *self.active_job.lock() = Some(jobid.to_string());
    }

    pub fn clear_active_job(&self) {
        self.active_job.lock().take();
    }

    pub fn has_active_job(&self) -> bool {
        self.active_job.lock().is_some()
    }

    pub fn pilot_start(&self) -> Instant {
        self.pilot_start
    }

    /// Sleep for `duration`, returning early (with `true`) on graceful stop.
    pub async fn sleep_or_stop(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.graceful_stop.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_graceful_stop(),
        }
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Last known pilot state, readable by anything that reports on the pilot.
#[derive(Debug, Default)]
pub struct Traces {
    nr_jobs: AtomicU32,
    error_code: AtomicI32,
    state: Mutex<String>,
    command: Mutex<String>,
}

impl Traces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_nr_jobs(&self) -> u32 {
        self.nr_jobs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn nr_jobs(&self) -> u32 {
        self.nr_jobs.load(Ordering::SeqCst)
    }

    pub fn set_error_code(&self, code: i32) {
        self.error_code.store(code, Ordering::SeqCst);
    }

    pub fn error_code(&self) -> i32 {
        self.error_code.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: &str) {
        *self.state.lock() = state.to_string();
    }

    pub fn state(&self) -> String {
        self.state.lock().clone()
    }

    pub fn set_command(&self, command: &str) {
        *self.command.lock() = command.to_string();
    }

    pub fn command(&self) -> String {
        self.command.lock().clone()
    }

    /// Forget errors left over from the previous job.
    pub fn reset_for_new_job(&self) {
        self.error_code.store(0, Ordering::SeqCst);
        self.command.lock().clear();
    }
}
