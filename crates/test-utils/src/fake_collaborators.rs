use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use jobpilot::BoxFuture;
use jobpilot::exec::{
    Collaborators, DiskSpace, HealthProbe, PayloadTarget, ProcessControl, ProxyManager,
    TransferBackend, TransferTarget,
};
use jobpilot::job::errorcodes;

/// Health probe answering from a script, 0 once the script runs dry.
#[derive(Debug, Default)]
pub struct FakeProbe {
    codes: Mutex<VecDeque<i32>>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn push(&self, code: i32) {
        self.codes.lock().push_back(code);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for FakeProbe {
    fn probe<'a>(&'a self, _target: &'a PayloadTarget) -> BoxFuture<'a, i32> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.codes.lock().pop_front().unwrap_or(0)
        })
    }
}

/// Records registrations and kills instead of touching processes.
#[derive(Debug, Default)]
pub struct FakeProcessControl {
    pub registered: Mutex<Vec<String>>,
    pub killed: Mutex<Vec<String>>,
    reaped: AtomicUsize,
}

impl FakeProcessControl {
    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().clone()
    }

    pub fn reap_count(&self) -> usize {
        self.reaped.load(Ordering::SeqCst)
    }
}

impl ProcessControl for FakeProcessControl {
    fn register(&self, jobid: &str, _pgrp: u32) {
        self.registered.lock().push(jobid.to_string());
    }

    fn unregister(&self, jobid: &str) {
        self.registered.lock().retain(|j| j != jobid);
    }

    fn kill_payload<'a>(&'a self, target: &'a PayloadTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.killed.lock().push(target.jobid.clone());
            Ok(())
        })
    }

    fn reap_children(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            self.reaped.fetch_add(1, Ordering::SeqCst);
            0
        })
    }
}

/// Proxy manager with settable answers.
#[derive(Debug)]
pub struct FakeProxy {
    pub verify_code: AtomicI32,
    pub refresh_ok: AtomicBool,
    pub replace_ok: AtomicBool,
    pub refreshes: AtomicUsize,
}

impl Default for FakeProxy {
    fn default() -> Self {
        Self {
            verify_code: AtomicI32::new(0),
            refresh_ok: AtomicBool::new(true),
            replace_ok: AtomicBool::new(true),
            refreshes: AtomicUsize::new(0),
        }
    }
}

impl ProxyManager for FakeProxy {
    fn verify(&self) -> BoxFuture<'_, i32> {
        Box::pin(async move { self.verify_code.load(Ordering::SeqCst) })
    }

    fn refresh(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.refresh_ok.load(Ordering::SeqCst)
        })
    }

    fn replace_for_job<'a>(&'a self, _jobid: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.replace_ok.load(Ordering::SeqCst) })
    }
}

/// Disk probe reporting plenty of space unless told otherwise.
#[derive(Debug)]
pub struct FakeDisk {
    pub enough_space: AtomicBool,
}

impl Default for FakeDisk {
    fn default() -> Self {
        Self {
            enough_space: AtomicBool::new(true),
        }
    }
}

impl DiskSpace for FakeDisk {
    fn available_mb(&self, _path: &Path) -> u64 {
        if self.enough_space.load(Ordering::SeqCst) { 100_000 } else { 0 }
    }

    fn check(&self, _path: &Path) -> i32 {
        if self.enough_space.load(Ordering::SeqCst) {
            0
        } else {
            errorcodes::NOLOCALSPACE
        }
    }
}

/// Transfer backend that records calls and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FakeTransfer {
    pub fail_stage_in: AtomicBool,
    pub fail_stage_out: AtomicBool,
    /// Extra time every transfer takes.
    pub delay: Mutex<Duration>,
    pub stage_ins: Mutex<Vec<String>>,
    pub stage_outs: Mutex<Vec<(String, bool)>>,
}

impl FakeTransfer {
    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl TransferBackend for FakeTransfer {
    fn stage_in<'a>(&'a self, target: &'a TransferTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.pause().await;
            self.stage_ins.lock().push(target.jobid.clone());
            if self.fail_stage_in.load(Ordering::SeqCst) {
                anyhow::bail!("stage-in of {} failed", target.jobid);
            }
            Ok(())
        })
    }

    fn stage_out<'a>(
        &'a self,
        target: &'a TransferTarget,
        log_only: bool,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.pause().await;
            self.stage_outs.lock().push((target.jobid.clone(), log_only));
            if self.fail_stage_out.load(Ordering::SeqCst) {
                anyhow::bail!("stage-out of {} failed", target.jobid);
            }
            Ok(())
        })
    }
}

/// Handles on the fakes behind a [`Collaborators`] bundle.
#[derive(Debug, Clone, Default)]
pub struct FakeCollaborators {
    pub probe: Arc<FakeProbe>,
    pub process: Arc<FakeProcessControl>,
    pub proxy: Arc<FakeProxy>,
    pub disk: Arc<FakeDisk>,
    pub transfer: Arc<FakeTransfer>,
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            probe: self.probe.clone(),
            process: self.process.clone(),
            proxy: self.proxy.clone(),
            disk: self.disk.clone(),
            transfer: self.transfer.clone(),
        }
    }
}
