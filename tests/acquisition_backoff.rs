// tests/acquisition_backoff.rs

mod common;
use crate::common::{init_tracing, job_definition, ConfigFileBuilder, TestPilot};

use std::time::Duration;

use jobpilot::job::errorcodes;
use jobpilot::stages::acquisition;
use jobpilot::types::JobSource;

#[tokio::test(start_paused = true)]
async fn no_job_reply_backs_off_a_full_minute() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot.dispatcher.push_no_job(20);

    let handle = tokio::spawn(acquisition::run(pilot.ctx.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pilot.dispatcher.getjob_calls(), 1);

    tokio::time::sleep(Duration::from_secs(58)).await;
    assert_eq!(pilot.dispatcher.getjob_calls(), 1, "retried before 60 s");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pilot.dispatcher.getjob_calls(), 2);

    pilot.ctx.flags.request_graceful_stop("test over");
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_interrupts_the_backoff() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());

    let handle = tokio::spawn(acquisition::run(pilot.ctx.clone()));
    tokio::time::sleep(Duration::from_secs(5)).await;
    pilot.ctx.flags.request_graceful_stop("test over");

    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("acquisition kept sleeping after graceful stop")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() <= Duration::from_secs(1));
    assert_eq!(pilot.dispatcher.getjob_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_ceiling_sets_graceful_stop() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().with_max_getjob_failures(2).build());
    pilot.dispatcher.push_job_error("connection refused");

    tokio::time::timeout(Duration::from_secs(600), acquisition::run(pilot.ctx.clone()))
        .await
        .expect("acquisition did not give up")
        .unwrap();

    assert!(pilot.ctx.flags.is_graceful_stop());
    assert_eq!(pilot.dispatcher.getjob_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn fatal_proxy_stops_before_any_request() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    pilot
        .collab
        .proxy
        .verify_code
        .store(errorcodes::NOPROXY, std::sync::atomic::Ordering::SeqCst);

    tokio::time::timeout(Duration::from_secs(600), acquisition::run(pilot.ctx.clone()))
        .await
        .unwrap()
        .unwrap();

    assert!(pilot.ctx.flags.is_graceful_stop());
    assert!(pilot.ctx.flags.abort_requested());
    assert_eq!(pilot.dispatcher.getjob_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn job_file_is_consumed_and_queued() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().with_source(JobSource::File).build());
    let path = pilot.ctx.config.job_definition_path();
    let body = serde_json::Value::Object(job_definition("4242", &[]).0).to_string();
    pilot.fs.add_file(&path, body);

    let handle = tokio::spawn(acquisition::run(pilot.ctx.clone()));
    let job = common::next_job(&pilot.ctx.queues.jobs).await;

    assert_eq!(job.lock().jobid, "4242");
    assert!(job.lock().timings.post_getjob.is_some());
    assert!(!pilot.ctx.fs.exists(&path), "definition file not removed");
    assert!(pilot.ctx.flags.has_active_job());

    pilot.ctx.queues.completed_jobids.put("4242".to_string());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!pilot.ctx.flags.has_active_job());

    // no time floor: the second round of the gate stops the pilot
    tokio::time::timeout(Duration::from_secs(600), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(pilot.ctx.flags.is_graceful_stop());
    assert_eq!(pilot.collab.process.reap_count(), 1);
}
