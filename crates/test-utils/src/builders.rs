#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jobpilot::config::{ConfigFile, RawConfigFile};
use jobpilot::engine::StageContext;
use jobpilot::fs::mock::MockFileSystem;
use jobpilot::fs::{FileSystem, RealFileSystem};
use jobpilot::job::{share, Job, SharedJob};
use jobpilot::site::policy_for;
use jobpilot::types::{JobSource, JobState, SubmitMode, Workflow};
use jobpilot::workernode::WorkerNode;

use crate::fake_collaborators::FakeCollaborators;
use crate::fake_dispatcher::FakeDispatcher;

pub const TEST_WORKDIR: &str = "/work";
pub const TEST_PILOT_HOME: &str = "/pilot";

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.pilot.site = "TEST_SITE".to_string();
        config.pilot.queue = "TEST_QUEUE".to_string();
        config.pilot.workdir = PathBuf::from(TEST_WORKDIR);
        config.pilot.pilot_home = PathBuf::from(TEST_PILOT_HOME);
        config.dispatcher.url = "https://dispatcher.test".to_string();
        Self { config }
    }

    pub fn with_dirs(mut self, dir: &Path) -> Self {
        self.config.pilot.workdir = dir.to_path_buf();
        self.config.pilot.pilot_home = dir.to_path_buf();
        self
    }

    pub fn with_source(mut self, source: JobSource) -> Self {
        self.config.acquisition.source = source;
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.config.pilot.workflow = workflow;
        self
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.config.pilot.submit_mode = mode;
        self
    }

    pub fn with_site_policy(mut self, name: &str) -> Self {
        self.config.pilot.site_policy = name.to_string();
        self
    }

    pub fn with_timefloor(mut self, minutes: u64) -> Self {
        self.config.pilot.timefloor = minutes;
        self
    }

    pub fn with_max_getjob_failures(mut self, max: u32) -> Self {
        self.config.acquisition.max_getjob_failures = max;
        self
    }

    pub fn with_update_server(mut self, on: bool) -> Self {
        self.config.pilot.update_server = on;
        self
    }

    pub fn with_status_check_interval(mut self, secs: u64) -> Self {
        self.config.monitor.status_check_interval_secs = secs;
        self
    }

    pub fn with_max_time(mut self, secs: u64) -> Self {
        self.config.pilot.max_time = Some(secs);
        self
    }

    /// Escape hatch for anything without a dedicated setter.
    pub fn edit(mut self, f: impl FnOnce(&mut RawConfigFile)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for jobs handed straight to a stage.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(jobid: &str) -> Self {
        let mut job = Job::new(jobid);
        job.taskid = "100".to_string();
        job.transformation = "true".to_string();
        Self { job }
    }

    pub fn with_indata(mut self, files: &[&str]) -> Self {
        self.job.indata = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.job.state = state;
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job.workdir = Some(dir.into());
        self
    }

    pub fn with_transformation(mut self, command: &str) -> Self {
        self.job.transformation = command.to_string();
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.job.label = label.to_string();
        self
    }

    pub fn with_error(mut self, code: i32, diag: &str) -> Self {
        self.job.add_error(code, diag);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }

    pub fn shared(self) -> SharedJob {
        share(self.job)
    }
}

/// A stage context wired to fakes, plus handles on those fakes.
pub struct TestPilot {
    pub ctx: Arc<StageContext>,
    pub dispatcher: FakeDispatcher,
    pub collab: FakeCollaborators,
    pub fs: MockFileSystem,
}

impl TestPilot {
    /// Context over an in-memory filesystem holding the pilot home and
    /// workdir parent.
    pub fn new(config: ConfigFile) -> Self {
        let fs = MockFileSystem::new();
        fs.add_dir(&config.pilot.workdir);
        fs.add_dir(&config.pilot.pilot_home);
        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
        Self::assemble(config, fs, shared)
    }

    /// Context over the real filesystem, for tests that run payloads.
    pub fn on_disk(config: ConfigFile) -> Self {
        Self::assemble(config, MockFileSystem::new(), Arc::new(RealFileSystem))
    }

    fn assemble(config: ConfigFile, fs: MockFileSystem, shared: Arc<dyn FileSystem>) -> Self {
        let dispatcher = FakeDispatcher::new();
        let collab = FakeCollaborators::new();
        let site = policy_for(&config.pilot.site_policy).expect("known site policy");
        let node = WorkerNode {
            name: "node.test".to_string(),
            ..WorkerNode::default()
        };
        let ctx = StageContext::new(
            config,
            Arc::new(dispatcher.clone()),
            site,
            collab.collaborators(),
            shared,
        )
        .with_node(node);
        Self {
            ctx: Arc::new(ctx),
            dispatcher,
            collab,
            fs,
        }
    }
}
