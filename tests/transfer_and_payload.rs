// tests/transfer_and_payload.rs

mod common;
use crate::common::{init_tracing, next_job, with_timeout, ConfigFileBuilder, JobBuilder, TestPilot};

use std::sync::atomic::Ordering;

use jobpilot::exec::{executor_loop, task_runner};
use jobpilot::job::errorcodes;
use jobpilot::types::{JobState, TransferStatus};

#[tokio::test]
async fn stage_in_success_lands_in_finished_data_in() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("41").with_indata(&["f1"]).shared();
    pilot.ctx.queues.data_in.put(job.clone());

    executor_loop::stage_in_job(&pilot.ctx, &job).await;

    assert_eq!(job.lock().stagein, TransferStatus::Done);
    assert!(job.lock().timings.stagein_end.is_some());
    assert!(pilot.ctx.queues.data_in.is_empty());
    assert!(pilot.ctx.queues.finished_data_in.contains_job("41"));
    assert_eq!(*pilot.collab.transfer.stage_ins.lock(), vec!["41".to_string()]);
}

#[tokio::test]
async fn stage_in_failure_is_recorded_on_the_job() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.collab.transfer.fail_stage_in.store(true, Ordering::SeqCst);
    let job = JobBuilder::new("42").with_indata(&["f1"]).shared();
    pilot.ctx.queues.data_in.put(job.clone());

    executor_loop::stage_in_job(&pilot.ctx, &job).await;

    let j = job.lock();
    assert_eq!(j.stagein, TransferStatus::Failed);
    assert_eq!(j.state, JobState::Failed);
    assert_eq!(j.piloterrorcode, errorcodes::STAGEINFAILED);
    drop(j);
    assert!(pilot.ctx.queues.failed_data_in.contains_job("42"));
    assert!(!pilot.ctx.queues.finished_data_in.contains_job("42"));
}

#[tokio::test]
async fn full_stage_out_finishes_the_job() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("43").with_state(JobState::Stageout).shared();
    pilot.ctx.queues.data_out.put(job.clone());

    executor_loop::stage_out_job(&pilot.ctx, &job).await;

    let j = job.lock();
    assert_eq!(j.state, JobState::Finished);
    assert_eq!(j.stageout, TransferStatus::Done);
    assert_eq!(j.log_transfer, TransferStatus::Done);
    drop(j);
    assert!(pilot.ctx.queues.finished_jobs.contains_job("43"));
    assert!(pilot.ctx.queues.data_out.is_empty());
}

#[tokio::test]
async fn failed_stage_out_fails_the_job() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.collab.transfer.fail_stage_out.store(true, Ordering::SeqCst);
    let job = JobBuilder::new("44").with_state(JobState::Stageout).shared();
    pilot.ctx.queues.data_out.put(job.clone());

    executor_loop::stage_out_job(&pilot.ctx, &job).await;

    assert_eq!(job.lock().piloterrorcode, errorcodes::STAGEOUTFAILED);
    assert_eq!(job.lock().state, JobState::Failed);
    assert!(pilot.ctx.queues.failed_jobs.contains_job("44"));
    assert_eq!(pilot.ctx.traces.error_code(), errorcodes::STAGEOUTFAILED);
}

#[tokio::test]
async fn log_only_stage_out_leaves_routing_to_the_caller() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.collab.transfer.fail_stage_out.store(true, Ordering::SeqCst);
    let job = JobBuilder::new("45").with_state(JobState::Failed).shared();
    job.lock().log_only_stageout = true;
    pilot.ctx.queues.data_out.put(job.clone());

    executor_loop::stage_out_job(&pilot.ctx, &job).await;

    assert_eq!(job.lock().log_transfer, TransferStatus::Failed);
    assert_eq!(job.lock().piloterrorcode, 0);
    assert!(pilot.ctx.queues.data_out.is_empty());
    assert!(pilot.ctx.queues.failed_jobs.is_empty());
    assert!(pilot.ctx.queues.finished_jobs.is_empty());
    assert_eq!(
        *pilot.collab.transfer.stage_outs.lock(),
        vec![("45".to_string(), true)]
    );
}

#[tokio::test(start_paused = true)]
async fn forwarding_moves_failures_to_failed_jobs() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.ctx.flags.set_active_job("46");
    let handle = tokio::spawn(executor_loop::run_forwarding(pilot.ctx.clone()));

    pilot.ctx.queues.failed_payloads.put(JobBuilder::new("46").shared());
    pilot.ctx.queues.failed_data_in.put(JobBuilder::new("47").shared());

    let first = with_timeout(next_job(&pilot.ctx.queues.failed_jobs)).await;
    let second = with_timeout(next_job(&pilot.ctx.queues.failed_jobs)).await;
    let mut ids = vec![first.lock().jobid.clone(), second.lock().jobid.clone()];
    ids.sort();
    assert_eq!(ids, vec!["46".to_string(), "47".to_string()]);

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stagein_wait_gives_up_on_failed_transfer() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("48").with_indata(&["f1"]).shared();
    job.lock().stagein = TransferStatus::Failed;

    assert!(!with_timeout(task_runner::wait_for_stagein(&pilot.ctx, &job)).await);

    let ok = JobBuilder::new("49").shared();
    pilot.ctx.queues.finished_data_in.put(ok.clone());
    assert!(with_timeout(task_runner::wait_for_stagein(&pilot.ctx, &ok)).await);
    assert!(pilot.ctx.queues.finished_data_in.is_empty());
}

#[tokio::test(start_paused = true)]
async fn aborted_job_waits_for_its_stage_in_then_fails() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("50").with_indata(&["f1"]).shared();
    job.lock().stagein = TransferStatus::InProgress;
    pilot.ctx.queues.data_in.put(job.clone());
    pilot.ctx.flags.request_abort();

    assert!(!with_timeout(task_runner::wait_for_stagein(&pilot.ctx, &job)).await);
    let abandon = tokio::spawn({
        let ctx = pilot.ctx.clone();
        let job = job.clone();
        async move { task_runner::abandon_before_payload(&ctx, job).await }
    });

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    assert!(pilot.ctx.queues.failed_payloads.is_empty());
    pilot.ctx.queues.data_in.remove_job("50");
    job.lock().stagein = TransferStatus::Done;
    pilot.ctx.queues.finished_data_in.put(job.clone());
    abandon.await.unwrap();

    let failed = with_timeout(next_job(&pilot.ctx.queues.failed_payloads)).await;
    let j = failed.lock();
    assert_eq!(j.state, JobState::Failed);
    assert_eq!(j.piloterrorcode, errorcodes::PANDAKILL);
    drop(j);
    assert!(pilot.ctx.queues.finished_data_in.is_empty());
}

#[tokio::test(start_paused = true)]
async fn job_killed_before_stage_in_is_not_transferred() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("52")
        .with_indata(&["f1"])
        .with_state(JobState::Failed)
        .shared();
    pilot.ctx.queues.data_in.put(job.clone());

    executor_loop::stage_in_job(&pilot.ctx, &job).await;

    assert!(pilot.collab.transfer.stage_ins.lock().is_empty());
    assert_eq!(job.lock().stagein, TransferStatus::NotStarted);
    assert!(pilot.ctx.queues.data_in.is_empty());
    assert!(pilot.ctx.queues.finished_data_in.is_empty());
}

#[cfg(unix)]
mod payload {
    use super::*;

    use tempfile::TempDir;

    fn on_disk(jobid: &str, command: &str) -> (TempDir, TestPilot, jobpilot::job::SharedJob) {
        let tmp = TempDir::new().unwrap();
        let pilot = TestPilot::on_disk(ConfigFileBuilder::new().with_dirs(tmp.path()).build());
        let workdir = pilot.ctx.job_workdir(jobid);
        std::fs::create_dir_all(&workdir).unwrap();
        let job = JobBuilder::new(jobid)
            .with_transformation(command)
            .with_workdir(workdir)
            .shared();
        (tmp, pilot, job)
    }

    #[tokio::test]
    async fn successful_payload_moves_to_stage_out() {
        init_tracing();
        let (_tmp, pilot, job) = on_disk("51", "echo hello");

        with_timeout(task_runner::run_payload(&pilot.ctx, job.clone())).await;

        let j = job.lock();
        assert_eq!(j.state, JobState::Stageout);
        assert_eq!(j.exit_code, Some(0));
        assert!(j.timings.payload_start.is_some());
        assert!(j.timings.payload_end.is_some());
        let stdout = std::fs::read_to_string(pilot.ctx.payload_stdout(j.workdir.as_ref().unwrap())).unwrap();
        drop(j);
        assert_eq!(stdout, "hello\n");
        assert!(pilot.ctx.queues.data_out.contains_job("51"));
        assert!(pilot.ctx.queues.monitored_payloads.is_empty());
        assert!(pilot.collab.process.registered.lock().is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_the_payload() {
        init_tracing();
        let (_tmp, pilot, job) = on_disk("52", "echo oops >&2; exit 4");

        with_timeout(task_runner::run_payload(&pilot.ctx, job.clone())).await;

        let j = job.lock();
        assert_eq!(j.state, JobState::Failed);
        assert_eq!(j.exit_code, Some(4));
        assert_eq!(j.piloterrorcode, errorcodes::PAYLOADEXECUTIONFAILURE);
        let stderr = std::fs::read_to_string(pilot.ctx.payload_stderr(j.workdir.as_ref().unwrap())).unwrap();
        drop(j);
        assert_eq!(stderr, "oops\n");
        assert!(pilot.ctx.queues.failed_payloads.contains_job("52"));
    }

    #[tokio::test]
    async fn abort_kills_a_running_payload() {
        init_tracing();
        let (_tmp, pilot, job) = on_disk("53", "sleep 30");
        pilot.ctx.flags.request_abort();

        let runner = tokio::spawn({
            let ctx = pilot.ctx.clone();
            let job = job.clone();
            async move { task_runner::run_payload(&ctx, job).await }
        });
        // The fake process control only records the kill, so stop the child
        // through the job's recorded process group.
        with_timeout(common::until(|| !pilot.collab.process.killed().is_empty())).await;
        let pid = job.lock().pid.unwrap();
        let _ = std::process::Command::new("kill").arg(pid.to_string()).status();

        with_timeout(runner).await.unwrap();
        assert_eq!(pilot.collab.process.killed(), vec!["53".to_string()]);
        assert!(pilot.ctx.queues.failed_payloads.contains_job("53"));
    }
}
