// tests/queue_monitor_close.rs

mod common;
use crate::common::{init_tracing, until, ConfigFileBuilder, JobBuilder, TestPilot};

use std::time::Duration;

use jobpilot::job::errorcodes;
use jobpilot::stages::queue_monitor;
use jobpilot::types::{JobState, TransferStatus};
use tokio::time::Instant;

const WORKDIR: &str = "/work/PanDA_Pilot-9";

fn failed_job(pilot: &TestPilot) -> jobpilot::job::SharedJob {
    pilot.fs.add_dir(WORKDIR);
    let job = JobBuilder::new("9")
        .with_state(JobState::Failed)
        .with_workdir(WORKDIR)
        .with_error(errorcodes::PAYLOADEXECUTIONFAILURE, "exit 1")
        .shared();
    pilot.ctx.flags.set_active_job("9");
    job
}

#[tokio::test(start_paused = true)]
async fn log_transfer_wait_is_bounded() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = failed_job(&pilot);
    pilot.ctx.queues.failed_jobs.put(job.clone());

    let started = Instant::now();
    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;
    let waited = started.elapsed();

    assert!(waited >= Duration::from_secs(118), "gave up after {waited:?}");
    assert!(waited <= Duration::from_secs(125), "waited {waited:?}");
    assert!(job.lock().log_only_stageout);
    assert_eq!(pilot.dispatcher.update_states(), vec!["failed"]);

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn log_transfer_wait_ends_when_transfer_settles() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = failed_job(&pilot);
    pilot.ctx.queues.failed_jobs.put(job.clone());

    let started = Instant::now();
    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    job.lock().log_transfer = TransferStatus::Done;
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;

    assert!(started.elapsed() < Duration::from_secs(15));
    assert!(pilot.ctx.queues.completed_jobs.contains_job("9"));

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn finished_job_is_reported_cleaned_and_completed() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.fs.add_dir(WORKDIR);
    pilot.fs.add_file(format!("{WORKDIR}/payload.stdout"), "ok");
    let job = JobBuilder::new("9")
        .with_state(JobState::Finished)
        .with_workdir(WORKDIR)
        .shared();
    pilot.ctx.flags.set_active_job("9");
    pilot.ctx.queues.finished_jobs.put(job.clone());

    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;

    assert!(job.lock().completed);
    assert_eq!(pilot.dispatcher.update_states(), vec!["finished"]);
    assert!(!pilot.ctx.fs.exists(std::path::Path::new(WORKDIR)));
    assert!(pilot.ctx.queues.data_out.is_empty());

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn nocleanup_keeps_the_workdir() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.fs.add_dir(WORKDIR);
    let job = JobBuilder::new("9")
        .with_state(JobState::Finished)
        .with_workdir(WORKDIR)
        .shared();
    job.lock().cleanup = false;
    pilot.ctx.flags.set_active_job("9");
    pilot.ctx.queues.finished_jobs.put(job);

    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;
    assert!(pilot.ctx.fs.is_dir(std::path::Path::new(WORKDIR)));

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

fn finished_job_staging_out(pilot: &TestPilot) -> jobpilot::job::SharedJob {
    pilot.fs.add_dir(WORKDIR);
    let job = JobBuilder::new("9")
        .with_state(JobState::Finished)
        .with_workdir(WORKDIR)
        .shared();
    job.lock().stageout = TransferStatus::InProgress;
    pilot.ctx.flags.set_active_job("9");
    pilot.ctx.queues.data_out.put(job.clone());
    job
}

#[tokio::test(start_paused = true)]
async fn stageout_wait_after_kill_signal_is_bounded_by_the_window() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = finished_job_staging_out(&pilot);
    jobpilot::engine::signals::handle_signal(&pilot.ctx.flags, "SIGTERM");
    pilot.ctx.queues.finished_jobs.put(job.clone());

    let started = Instant::now();
    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;
    let waited = started.elapsed();

    assert!(waited >= Duration::from_secs(114), "gave up after {waited:?}");
    assert!(waited <= Duration::from_secs(118), "waited {waited:?}");
    assert_eq!(pilot.dispatcher.update_states(), vec!["finished"]);
    assert!(pilot.ctx.flags.job_aborted());

    pilot.ctx.flags.clear_active_job();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stageout_wait_after_kill_signal_ends_with_the_transfer() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = finished_job_staging_out(&pilot);
    pilot.ctx.flags.record_kill_signal("SIGTERM");
    pilot.ctx.queues.finished_jobs.put(job.clone());

    let started = Instant::now();
    let handle = tokio::spawn(queue_monitor::run(pilot.ctx.clone()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!pilot.ctx.queues.completed_jobids.contains_id("9"));
    job.lock().stageout = TransferStatus::Done;
    pilot.ctx.queues.data_out.remove_job("9");
    until(|| pilot.ctx.queues.completed_jobids.contains_id("9")).await;

    assert!(started.elapsed() < Duration::from_secs(13));
    assert_eq!(pilot.dispatcher.update_states(), vec!["finished"]);

    pilot.ctx.flags.clear_active_job();
    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}
