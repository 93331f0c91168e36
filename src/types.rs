use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Internal job state, owned by whichever stage currently holds the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Starting,
    Stagein,
    Running,
    Stageout,
    Holding,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Starting => "starting",
            JobState::Stagein => "stagein",
            JobState::Running => "running",
            JobState::Stageout => "stageout",
            JobState::Holding => "holding",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }

    /// `finished` and `failed` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::New
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(JobState::New),
            "starting" => Ok(JobState::Starting),
            "stagein" => Ok(JobState::Stagein),
            "running" => Ok(JobState::Running),
            "stageout" => Ok(JobState::Stageout),
            "holding" => Ok(JobState::Holding),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("invalid job state: {other}")),
        }
    }
}

/// State as last reported to (and accepted by) the dispatcher.
///
/// Lags the internal [`JobState`]; `Unset` is the empty string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    #[default]
    Unset,
    Starting,
    Running,
    Holding,
    Finished,
    Failed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Unset => "",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Holding => "holding",
            ServerState::Finished => "finished",
            ServerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Finished | ServerState::Failed)
    }

    /// True for states that end the job's reporting cycle.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ServerState::Finished | ServerState::Failed | ServerState::Holding
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the batch system delivered this pilot.
///
/// In `push` mode the job definition is known before the pilot starts, so
/// the local disk-space check moves from acquisition to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    #[default]
    Pull,
    Push,
}

/// Where job definitions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    #[default]
    Dispatcher,
    /// Pre-placed job definition file (harvester or pod mode).
    File,
    /// Task id delivered over a message broker.
    Broker,
}

/// Operating mode of the pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    #[default]
    Generic,
    /// Reduced mode without local payload execution.
    Stager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Production,
    /// Unified dispatch: production and analysis jobs share one queue.
    Unified,
}

/// Progress of a stage-in or stage-out transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl TransferStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TransferStatus::Done | TransferStatus::Failed)
    }
}
