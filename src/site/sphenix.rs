// src/site/sphenix.rs

use std::path::Path;

use tracing::{debug, info, warn};

use crate::fs::{tail, FileSystem};
use crate::job::Job;
use crate::types::JobState;

use super::{GenericPolicy, Rejection, SitePolicy};

const PILOT_LOG_TAIL_LINES: usize = 20;

/// sPHENIX: payloads always run in a container, and failed or held jobs
/// carry the tail of the pilot log back to the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphenixPolicy;

impl SitePolicy for SphenixPolicy {
    fn name(&self) -> &'static str {
        "sphenix"
    }

    fn validate_job(&self, job: &Job) -> Result<(), Rejection> {
        GenericPolicy.validate_job(job)
    }

    fn do_use_container(&self, _job: &Job) -> bool {
        true
    }

    fn log_extracts(&self, fs: &dyn FileSystem, job: &Job, state: JobState, pilot_log: &Path) -> String {
        info!(jobid = %job.jobid, "building log extracts");
        if !fs.exists(pilot_log) {
            warn!(path = %pilot_log.display(), "pilot log file does not exist");
            return String::new();
        }
        let extracts = match tail(fs, pilot_log, PILOT_LOG_TAIL_LINES) {
            Ok(t) if !t.is_empty() => {
                let name = pilot_log
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("- Log from {name} -\n{t}")
            }
            Ok(_) => return String::new(),
            Err(e) => {
                warn!(error = %e, "cannot read pilot log");
                return String::new();
            }
        };
        warn!(jobid = %job.jobid, "tail of the pilot log:\n{extracts}");
        if matches!(state, JobState::Failed | JobState::Holding) {
            extracts
        } else {
            String::new()
        }
    }

    fn interpret_payload(&self, fs: &dyn FileSystem, job: &Job, stdout: &Path, stderr: &Path) -> i32 {
        for (label, path) in [("stdout", stdout), ("stderr", stderr)] {
            match fs.read_to_string(path) {
                Ok(contents) => debug!(jobid = %job.jobid, "payload {label} dump\n{contents}"),
                Err(e) => debug!(jobid = %job.jobid, error = %e, "no payload {label}"),
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn log_with_lines(n: usize) -> (MockFileSystem, &'static Path) {
        let fs = MockFileSystem::new();
        let path = Path::new("/work/pilotlog.txt");
        let contents: String = (1..=n).map(|i| format!("line {i}\n")).collect();
        fs.add_file(path, contents);
        (fs, path)
    }

    #[test]
    fn failed_jobs_get_pilot_log_tail() {
        let (fs, path) = log_with_lines(30);
        let extracts = SphenixPolicy.log_extracts(&fs, &Job::new("1"), JobState::Failed, path);
        assert!(extracts.starts_with("- Log from pilotlog.txt -\n"));
        assert!(extracts.contains("line 11"));
        assert!(!extracts.contains("line 10\n"));
        assert!(extracts.ends_with("line 30"));
    }

    #[test]
    fn finished_jobs_get_no_extracts() {
        let (fs, path) = log_with_lines(5);
        assert!(SphenixPolicy
            .log_extracts(&fs, &Job::new("1"), JobState::Finished, path)
            .is_empty());
    }
}
