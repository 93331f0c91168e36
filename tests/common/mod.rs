// tests/common/mod.rs

#![allow(dead_code)]

pub use jobpilot_test_utils::builders::{ConfigFileBuilder, JobBuilder, TestPilot};
pub use jobpilot_test_utils::fake_dispatcher::{definition, job_definition, Call, FakeDispatcher};
pub use jobpilot_test_utils::{init_tracing, with_timeout};

use std::time::Duration;

use jobpilot::engine::NamedQueue;
use jobpilot::job::SharedJob;

/// Wait (in virtual or real time) until `queue` holds a job, then take it.
pub async fn next_job(queue: &NamedQueue<SharedJob>) -> SharedJob {
    loop {
        if let Some(job) = queue.try_get() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Poll `cond` every 100 ms until it holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
