//! Shared fixtures for the `jobpilot` integration tests: a scripted
//! dispatcher, recording collaborators and builders that assemble a
//! [`jobpilot::engine::StageContext`] around them.

pub mod builders;
pub mod fake_collaborators;
pub mod fake_dispatcher;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Upper bound for any single awaited step in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness, filtered by
/// `PILOT_LOG` (default `info`). Output shows up for failing tests or
/// with `--nocapture`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(jobpilot::logging::LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking after [`TEST_TIMEOUT`]. Under `start_paused` the
/// limit is in virtual time, so it only trips when the stages stall.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test step did not finish within {TEST_TIMEOUT:?}"),
    }
}
