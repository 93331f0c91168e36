// src/heartbeat/cadence.rs

use std::time::Duration;

use tokio::time::Instant;

use crate::config::model::HeartbeatSection;
use crate::job::Job;
use crate::types::JobState;

pub fn heartbeat_period(config: &HeartbeatSection, job: &Job) -> Duration {
    if job.debug {
        Duration::from_secs(config.debug_period_secs)
    } else {
        Duration::from_secs(config.period_secs)
    }
}

/// Whether a periodic heartbeat should go out for `job` at `now`.
///
/// Only jobs that are still active and not yet closed on the server get
/// periodic updates. A job that never had one is due immediately.
pub fn is_heartbeat_due(config: &HeartbeatSection, job: &Job, now: Instant) -> bool {
    if job.state.is_terminal() || job.state == JobState::Holding {
        return false;
    }
    if job.server_state.is_terminal() || job.completed {
        return false;
    }
    match job.last_heartbeat {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= heartbeat_period(config, job),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerState;

    fn running_job() -> Job {
        let mut job = Job::new("1");
        job.set_state(JobState::Running);
        job.server_state = ServerState::Running;
        job
    }

    #[tokio::test(start_paused = true)]
    async fn due_after_one_period() {
        let config = HeartbeatSection::default();
        let mut job = running_job();
        assert!(is_heartbeat_due(&config, &job, Instant::now()));

        job.last_heartbeat = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(config.period_secs - 1)).await;
        assert!(!is_heartbeat_due(&config, &job, Instant::now()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(is_heartbeat_due(&config, &job, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn debug_mode_shortens_period() {
        let config = HeartbeatSection::default();
        let mut job = running_job();
        job.debug = true;
        job.last_heartbeat = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(config.debug_period_secs)).await;
        assert!(is_heartbeat_due(&config, &job, Instant::now()));
    }

    #[test]
    fn closed_jobs_get_no_heartbeat() {
        let config = HeartbeatSection::default();
        let mut job = running_job();
        job.server_state = ServerState::Finished;
        assert!(!is_heartbeat_due(&config, &job, Instant::now()));

        let mut job = running_job();
        job.completed = true;
        assert!(!is_heartbeat_due(&config, &job, Instant::now()));

        let mut job = running_job();
        job.set_state(JobState::Holding);
        assert!(!is_heartbeat_due(&config, &job, Instant::now()));
    }
}
