// tests/heartbeat_protocol.rs

mod common;
use crate::common::{init_tracing, Call, ConfigFileBuilder, JobBuilder, TestPilot};

use std::path::PathBuf;

use chrono::Utc;
use jobpilot::dispatcher::UpdateReply;
use jobpilot::engine::ServerUpdate;
use jobpilot::heartbeat::payload::PILOT_LOG_LIMIT;
use jobpilot::heartbeat::{build_update_params, send_state, UpdateExtras, UpdateOutcome, LOCAL_HEARTBEAT_FILE};
use jobpilot::job::errorcodes;
use jobpilot::types::{JobState, ServerState, Workflow};
use jobpilot::workernode::WorkerNode;

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn final_payload_carries_end_time_errors_and_capped_log() {
    let config = ConfigFileBuilder::new().build();
    let job = JobBuilder::new("1")
        .with_state(JobState::Failed)
        .with_error(errorcodes::STAGEOUTFAILED, "no space on storage")
        .build();
    let extras = UpdateExtras {
        pilot_log: "x".repeat(5000),
        ..UpdateExtras::default()
    };

    let params = build_update_params(&config, &WorkerNode::default(), &job, ServerState::Finished, extras, Utc::now());

    assert!(param(&params, "endTime").is_some());
    assert_eq!(param(&params, "pilotErrorCode"), Some("1137"));
    assert_eq!(param(&params, "pilotErrorDiag"), Some("no space on storage"));
    assert_eq!(param(&params, "pilotLog").map(|l| l.chars().count()), Some(PILOT_LOG_LIMIT));
}

#[test]
fn running_payload_has_no_final_fields() {
    let config = ConfigFileBuilder::new().build();
    let job = JobBuilder::new("1").with_state(JobState::Running).build();

    let params = build_update_params(
        &config,
        &WorkerNode::default(),
        &job,
        ServerState::Running,
        UpdateExtras::default(),
        Utc::now(),
    );

    assert_eq!(param(&params, "state"), Some("running"));
    assert_eq!(param(&params, "siteName"), Some("TEST_SITE"));
    assert!(param(&params, "endTime").is_none());
    assert!(param(&params, "pilotLog").is_none());
}

#[tokio::test]
async fn first_update_reports_starting() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1").with_state(JobState::Running).shared();

    let outcome = send_state(&pilot.ctx, &job, JobState::Running).await;

    assert_eq!(outcome, UpdateOutcome::Sent);
    assert_eq!(pilot.dispatcher.update_states(), vec!["starting"]);
    assert_eq!(job.lock().server_state, ServerState::Starting);

    send_state(&pilot.ctx, &job, JobState::Running).await;
    assert_eq!(pilot.dispatcher.update_states(), vec!["starting", "running"]);
}

#[tokio::test]
async fn completed_is_set_once_and_only_after_success() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1").with_state(JobState::Finished).shared();
    pilot.dispatcher.push_update_error("timeout");

    let outcome = send_state(&pilot.ctx, &job, JobState::Finished).await;
    assert_eq!(outcome, UpdateOutcome::Failed);
    assert!(!job.lock().completed);
    assert_eq!(pilot.ctx.flags.server_update(), ServerUpdate::FinalFailed);

    let outcome = send_state(&pilot.ctx, &job, JobState::Finished).await;
    assert_eq!(outcome, UpdateOutcome::Sent);
    assert!(job.lock().completed);
    assert_eq!(pilot.ctx.flags.server_update(), ServerUpdate::FinalDone);
    assert_eq!(pilot.dispatcher.update_states(), vec!["finished", "finished"]);
}

#[tokio::test]
async fn pending_error_turns_finished_into_failed() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1")
        .with_state(JobState::Finished)
        .with_error(errorcodes::STAGEOUTFAILED, "stage-out")
        .shared();

    send_state(&pilot.ctx, &job, JobState::Finished).await;

    assert_eq!(pilot.dispatcher.update_states(), vec!["failed"]);
    assert_eq!(job.lock().state, JobState::Failed);
}

#[tokio::test]
async fn pending_error_turns_holding_into_failed() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1")
        .with_state(JobState::Holding)
        .with_error(errorcodes::GENERALERROR, "boom")
        .shared();
    job.lock().server_state = ServerState::Running;

    send_state(&pilot.ctx, &job, JobState::Holding).await;

    assert_eq!(pilot.dispatcher.update_states(), vec!["failed"]);
    let j = job.lock();
    assert_eq!(j.state, JobState::Failed);
    assert_eq!(j.server_state, ServerState::Failed);
    assert_eq!(j.piloterrorcode, errorcodes::GENERALERROR);
    assert!(j.completed);
}

#[tokio::test]
async fn holding_without_error_is_reported_as_holding() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1").with_state(JobState::Holding).shared();
    job.lock().server_state = ServerState::Running;

    send_state(&pilot.ctx, &job, JobState::Holding).await;

    assert_eq!(pilot.dispatcher.update_states(), vec!["holding"]);
    assert_eq!(job.lock().state, JobState::Holding);
}

#[tokio::test]
async fn terminal_state_survives_later_updates() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1").with_state(JobState::Failed).shared();

    send_state(&pilot.ctx, &job, JobState::Running).await;
    assert!(!job.lock().set_state(JobState::Running));
    assert_eq!(job.lock().state, JobState::Failed);
}

#[tokio::test]
async fn tobekilled_fails_the_job_and_requests_abort() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let workdir = PathBuf::from("/work/PanDA_Pilot-1");
    pilot.fs.add_dir(&workdir);
    let job = JobBuilder::new("1")
        .with_state(JobState::Running)
        .with_workdir(&workdir)
        .shared();
    job.lock().pid = Some(4321);
    pilot.dispatcher.push_command("tobekilled");

    send_state(&pilot.ctx, &job, JobState::Running).await;

    let j = job.lock();
    assert_eq!(j.state, JobState::Failed);
    assert_eq!(j.piloterrorcode, errorcodes::PANDAKILL);
    drop(j);
    assert!(pilot.ctx.flags.abort_requested());
    assert_eq!(pilot.ctx.traces.error_code(), errorcodes::PANDAKILL);
    assert_eq!(pilot.ctx.traces.command(), "tobekilled");
    assert_eq!(pilot.collab.process.killed(), vec!["1".to_string()]);
}

#[tokio::test]
async fn tobekilled_in_stager_workflow_finishes_the_job() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().with_workflow(Workflow::Stager).build());
    let workdir = PathBuf::from("/work/PanDA_Pilot-1");
    pilot.fs.add_dir(&workdir);
    let job = JobBuilder::new("1")
        .with_state(JobState::Running)
        .with_workdir(&workdir)
        .shared();
    pilot.dispatcher.push_command("tobekilled");

    send_state(&pilot.ctx, &job, JobState::Running).await;

    assert_eq!(job.lock().state, JobState::Finished);
    assert!(!job.lock().has_pending_error());
    assert!(pilot.ctx.flags.abort_requested());

    send_state(&pilot.ctx, &job, JobState::Finished).await;
    assert_eq!(pilot.dispatcher.update_states().last().map(String::as_str), Some("finished"));
    assert!(job.lock().completed);
}

#[tokio::test]
async fn tobekilled_is_ignored_once_the_workdir_is_gone() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1")
        .with_state(JobState::Running)
        .with_workdir("/work/PanDA_Pilot-1")
        .shared();
    pilot.dispatcher.push_command("tobekilled");

    send_state(&pilot.ctx, &job, JobState::Running).await;

    assert_eq!(job.lock().state, JobState::Running);
    assert!(!pilot.ctx.flags.abort_requested());
}

#[tokio::test]
async fn debug_commands_toggle_debug_mode() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().build());
    let job = JobBuilder::new("1").with_state(JobState::Running).shared();

    pilot.dispatcher.push_command("tail -n 5 payload.stdout");
    send_state(&pilot.ctx, &job, JobState::Running).await;
    assert!(job.lock().debug);
    assert_eq!(job.lock().debug_command.as_deref(), Some("tail -n 5 payload.stdout"));

    pilot.dispatcher.push_command("ls; rm -rf /");
    send_state(&pilot.ctx, &job, JobState::Running).await;
    assert!(!job.lock().debug);
    assert!(job.lock().debug_command.is_none());

    pilot.dispatcher.push_update(UpdateReply {
        status_code: 0,
        command: Some("nocleanup".into()),
        pilot_secrets: Some("{\"token\": \"abc\"}".into()),
    });
    send_state(&pilot.ctx, &job, JobState::Running).await;
    assert!(!job.lock().cleanup);
    assert_eq!(
        pilot.fs.file_contents("/pilot/pilot_secrets.json").as_deref(),
        Some("{\"token\": \"abc\"}")
    );
}

#[tokio::test]
async fn updates_are_stored_locally_when_server_updates_are_off() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().with_update_server(false).build());
    let job = JobBuilder::new("1").with_state(JobState::Finished).shared();

    let outcome = send_state(&pilot.ctx, &job, JobState::Finished).await;

    assert_eq!(outcome, UpdateOutcome::Stored);
    assert!(job.lock().completed);
    assert!(pilot.dispatcher.calls().is_empty());
    let stored = pilot
        .fs
        .file_contents(PathBuf::from("/pilot").join(LOCAL_HEARTBEAT_FILE))
        .expect("local heartbeat written");
    let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(value["state"], "finished");
    assert_eq!(value["jobId"], "1");
}

#[tokio::test]
async fn sphenix_failed_update_carries_pilot_log_tail() {
    init_tracing();
    let pilot = TestPilot::new(ConfigFileBuilder::new().with_site_policy("sphenix").build());
    let lines: Vec<String> = (0..40).map(|i| format!("line {i}")).collect();
    pilot.fs.add_file("/pilot/pilotlog.txt", lines.join("\n"));
    let job = JobBuilder::new("1")
        .with_state(JobState::Failed)
        .with_error(errorcodes::GENERALERROR, "boom")
        .shared();

    send_state(&pilot.ctx, &job, JobState::Failed).await;

    let updates = pilot.dispatcher.updates();
    let log = match &updates[0] {
        call @ Call::UpdateJob(_) => call.param("pilotLog").unwrap_or_default().to_string(),
        other => panic!("unexpected call {other:?}"),
    };
    assert!(log.starts_with("- Log from pilotlog.txt -"));
    assert!(log.contains("line 39"));
    assert!(!log.contains("line 10\n"));
}
