// src/engine/signals.rs

//! Batch-system signals.
//!
//! A signal does not stop the process by itself. It is recorded in the
//! control flags, the running job is aborted and the pilot winds down
//! through the normal graceful-stop path so the final update still goes
//! out inside the batch system's kill window.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::engine::StageContext;
use crate::engine::flags::ControlFlags;

/// Record `name` and ask every stage to wind down.
pub fn handle_signal(flags: &ControlFlags, name: &str) {
    warn!(signal = name, "received signal, aborting job and stopping");
    flags.record_kill_signal(name);
    flags.request_abort();
    flags.request_graceful_stop(name);
}

/// Listen for SIGTERM, SIGINT, SIGQUIT and SIGUSR1 until the returned task
/// is aborted.
#[cfg(unix)]
pub fn install_signal_handlers(ctx: Arc<StageContext>) -> Result<JoinHandle<()>> {
    use anyhow::Context;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                Some(()) = sigquit.recv() => "SIGQUIT",
                Some(()) = sigusr1.recv() => "SIGUSR1",
                else => break,
            };
            handle_signal(&ctx.flags, name);
        }
    }))
}

#[cfg(not(unix))]
pub fn install_signal_handlers(ctx: Arc<StageContext>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            handle_signal(&ctx.flags, "SIGINT");
        }
    }))
}
