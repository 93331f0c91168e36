// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::job::errorcodes;
use crate::types::{JobSource, QueueType, SubmitMode, Workflow};

/// Raw configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pilot]
/// site = "BNL_SPHENIX"
/// queue = "BNL_SPHENIX_1"
/// timefloor = 60
///
/// [dispatcher]
/// url = "https://pandaserver.example.org"
/// port = 25443
///
/// [acquisition]
/// source = "dispatcher"
///
/// [monitor.codes]
/// kill_now = [1144, 1205]
/// ```
///
/// All sections are optional and have reasonable defaults; only
/// `[pilot].site` and `[pilot].queue` must be provided.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pilot: PilotSection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub acquisition: AcquisitionSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub payload: PayloadSection,
}

/// Validated configuration. Construct through `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pilot: PilotSection,
    pub dispatcher: DispatcherSection,
    pub acquisition: AcquisitionSection,
    pub heartbeat: HeartbeatSection,
    pub monitor: MonitorSection,
    pub payload: PayloadSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            pilot: raw.pilot,
            dispatcher: raw.dispatcher,
            acquisition: raw.acquisition,
            heartbeat: raw.heartbeat,
            monitor: raw.monitor,
            payload: raw.payload,
        }
    }

    /// Maximum number of getJob requests, honouring the harvester cap.
    pub fn effective_max_getjob_requests(&self) -> u32 {
        if self.pilot.harvester {
            HARVESTER_MAX_GETJOB_REQUESTS
        } else {
            self.acquisition.max_getjob_requests
        }
    }

    /// Delay between acquisition attempts after a failure.
    pub fn getjob_retry_delay_secs(&self) -> u64 {
        if self.pilot.harvester && self.acquisition.source == JobSource::File {
            self.acquisition.file_poll_delay_secs
        } else {
            self.acquisition.retry_delay_secs
        }
    }

    /// Path of the pre-placed job definition file.
    pub fn job_definition_path(&self) -> PathBuf {
        self.pilot.pilot_home.join(&self.acquisition.job_definition_file)
    }
}

/// A harvester-backed pilot never asks for more than this many jobs.
pub const HARVESTER_MAX_GETJOB_REQUESTS: u32 = 60;

/// `[pilot]` section: identity and operating mode of this pilot.
#[derive(Debug, Clone, Deserialize)]
pub struct PilotSection {
    #[serde(default)]
    pub site: String,
    /// Queue / computing element name.
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    /// prodSourceLabel sent with getJob (e.g. `managed`, `user`, `ptest`).
    #[serde(default = "default_job_label")]
    pub job_label: String,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub working_group: Option<String>,
    #[serde(default)]
    pub country_group: Option<String>,
    #[serde(default)]
    pub allow_other_country: bool,
    /// Distinguished name sent as `prodUserID` when `job_label = "self"`.
    #[serde(default)]
    pub user_dn: Option<String>,

    /// Parent directory for job working directories.
    #[serde(default = "default_dir")]
    pub workdir: PathBuf,
    /// Launch directory (job definition file, side files, heartbeat dumps).
    #[serde(default = "default_dir")]
    pub pilot_home: PathBuf,
    #[serde(default = "default_pilot_log")]
    pub pilot_log: String,

    #[serde(default = "default_pilot_id")]
    pub pilot_id: String,
    #[serde(default = "default_pilot_type")]
    pub pilot_type: String,
    #[serde(default)]
    pub scheduler_id: Option<String>,

    #[serde(default)]
    pub submit_mode: SubmitMode,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub queue_type: QueueType,
    #[serde(default)]
    pub harvester: bool,
    #[serde(default)]
    pub harvester_id: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub pod: bool,

    /// Minutes during which the pilot may keep asking for new jobs.
    /// Zero means a single job.
    #[serde(default)]
    pub timefloor: u64,
    /// Batch-system wall time limit in seconds, if known.
    #[serde(default)]
    pub max_time: Option<u64>,

    /// When false, heartbeats are written to local files instead.
    #[serde(default = "default_true")]
    pub update_server: bool,
    /// Extra files receiving a copy of every locally persisted heartbeat.
    #[serde(default)]
    pub report_files: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub verify_proxy: bool,
    /// Exit code of this command is the proxy verification result.
    #[serde(default)]
    pub proxy_check_command: Option<String>,
    #[serde(default)]
    pub proxy_refresh_command: Option<String>,

    /// Minimum free space (MB) in `workdir` needed to run a job.
    #[serde(default = "default_min_disk_space_mb")]
    pub min_disk_space_mb: u64,

    /// Site policy name, resolved through `site::registry`.
    #[serde(default = "default_site_policy")]
    pub site_policy: String,
}

fn default_job_label() -> String {
    "managed".to_string()
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_pilot_log() -> String {
    "pilotlog.txt".to_string()
}

fn default_pilot_id() -> String {
    "unknown".to_string()
}

fn default_pilot_type() -> String {
    "PR".to_string()
}

fn default_true() -> bool {
    true
}

fn default_min_disk_space_mb() -> u64 {
    5000
}

fn default_site_policy() -> String {
    "generic".to_string()
}

impl Default for PilotSection {
    fn default() -> Self {
        Self {
            site: String::new(),
            queue: String::new(),
            resource_type: None,
            job_label: default_job_label(),
            job_type: None,
            working_group: None,
            country_group: None,
            allow_other_country: false,
            user_dn: None,
            workdir: default_dir(),
            pilot_home: default_dir(),
            pilot_log: default_pilot_log(),
            pilot_id: default_pilot_id(),
            pilot_type: default_pilot_type(),
            scheduler_id: None,
            submit_mode: SubmitMode::default(),
            workflow: Workflow::default(),
            queue_type: QueueType::default(),
            harvester: false,
            harvester_id: None,
            worker_id: None,
            pod: false,
            timefloor: 0,
            max_time: None,
            update_server: true,
            report_files: Vec::new(),
            verify_proxy: true,
            proxy_check_command: None,
            proxy_refresh_command: None,
            min_disk_space_mb: default_min_disk_space_mb(),
            site_policy: default_site_policy(),
        }
    }
}

/// `[dispatcher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout of a single HTTP attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per request before giving up.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_url() -> String {
    "https://pandaserver.cern.ch".to_string()
}

fn default_port() -> u16 {
    25443
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_attempts() -> u32 {
    2
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            attempts: default_attempts(),
        }
    }
}

/// `[acquisition]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionSection {
    #[serde(default)]
    pub source: JobSource,
    #[serde(default = "default_job_definition_file")]
    pub job_definition_file: String,
    #[serde(default = "default_max_getjob_requests")]
    pub max_getjob_requests: u32,
    #[serde(default = "default_max_getjob_failures")]
    pub max_getjob_failures: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_file_poll_delay_secs")]
    pub file_poll_delay_secs: u64,
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,
    /// Upper bound on waiting for an in-flight final update before stopping.
    #[serde(default = "default_final_update_wait_secs")]
    pub final_update_wait_secs: u64,
}

fn default_job_definition_file() -> String {
    "pandaJobData.out".to_string()
}

fn default_max_getjob_requests() -> u32 {
    100
}

fn default_max_getjob_failures() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_file_poll_delay_secs() -> u64 {
    1
}

fn default_completion_poll_ms() -> u64 {
    500
}

fn default_final_update_wait_secs() -> u64 {
    120
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            source: JobSource::default(),
            job_definition_file: default_job_definition_file(),
            max_getjob_requests: default_max_getjob_requests(),
            max_getjob_failures: default_max_getjob_failures(),
            retry_delay_secs: default_retry_delay_secs(),
            file_poll_delay_secs: default_file_poll_delay_secs(),
            completion_poll_ms: default_completion_poll_ms(),
            final_update_wait_secs: default_final_update_wait_secs(),
        }
    }
}

/// `[heartbeat]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_debug_period_secs")]
    pub debug_period_secs: u64,
    /// Size cap (bytes) on debug command output attached to heartbeats.
    #[serde(default = "default_debug_output_limit")]
    pub debug_output_limit: usize,
}

fn default_period_secs() -> u64 {
    1800
}

fn default_debug_period_secs() -> u64 {
    300
}

fn default_debug_output_limit() -> usize {
    2048
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            debug_period_secs: default_debug_period_secs(),
            debug_output_limit: default_debug_output_limit(),
        }
    }
}

/// `[monitor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    /// Health probe command; its exit code is classified by `[monitor.codes]`.
    #[serde(default)]
    pub probe_command: Option<String>,
    /// Seconds between dispatcher status queries; 0 disables them.
    #[serde(default)]
    pub status_check_interval_secs: u64,
    #[serde(default = "default_log_transfer_poll_secs")]
    pub log_transfer_poll_secs: u64,
    #[serde(default = "default_log_transfer_max_polls")]
    pub log_transfer_max_polls: u32,
    #[serde(default)]
    pub codes: CodesSection,
}

fn default_loop_interval_ms() -> u64 {
    500
}

fn default_log_transfer_poll_secs() -> u64 {
    2
}

fn default_log_transfer_max_polls() -> u32 {
    60
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            loop_interval_ms: default_loop_interval_ms(),
            probe_command: None,
            status_check_interval_secs: 0,
            log_transfer_poll_secs: default_log_transfer_poll_secs(),
            log_transfer_max_polls: default_log_transfer_max_polls(),
            codes: CodesSection::default(),
        }
    }
}

/// `[monitor.codes]`: probe exit code classification.
#[derive(Debug, Clone, Deserialize)]
pub struct CodesSection {
    #[serde(default = "errorcodes::default_kill_now_codes")]
    pub kill_now: Vec<i32>,
    #[serde(default = "errorcodes::default_near_expiry_codes")]
    pub near_expiry: Vec<i32>,
    #[serde(default = "errorcodes::default_lease_expiry_codes")]
    pub lease_expiry: Vec<i32>,
    #[serde(default = "errorcodes::default_recoverable_codes")]
    pub recoverable: Vec<i32>,
}

impl Default for CodesSection {
    fn default() -> Self {
        Self {
            kill_now: errorcodes::default_kill_now_codes(),
            near_expiry: errorcodes::default_near_expiry_codes(),
            lease_expiry: errorcodes::default_lease_expiry_codes(),
            recoverable: errorcodes::default_recoverable_codes(),
        }
    }
}

/// `[payload]` section used by the bundled payload runner.
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadSection {
    #[serde(default = "default_payload_stdout")]
    pub stdout: String,
    #[serde(default = "default_payload_stderr")]
    pub stderr: String,
}

fn default_payload_stdout() -> String {
    "payload.stdout".to_string()
}

fn default_payload_stderr() -> String {
    "payload.stderr".to_string()
}

impl Default for PayloadSection {
    fn default() -> Self {
        Self {
            stdout: default_payload_stdout(),
            stderr: default_payload_stderr(),
        }
    }
}
