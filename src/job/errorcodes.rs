// src/job/errorcodes.rs

//! Pilot error codes reported to the dispatcher, and the tables that
//! classify them.
//!
//! Which codes count as "kill now", "near expiry" or "recoverable" differs
//! between experiments, so the classification lives in a [`CodeTable`]
//! built from `[monitor.codes]` rather than in match arms.

use std::collections::HashSet;

use crate::config::model::CodesSection;

pub const GENERALERROR: i32 = 1008;
pub const NOLOCALSPACE: i32 = 1098;
pub const STAGEINFAILED: i32 = 1099;
pub const MKDIR: i32 = 1134;
pub const STAGEOUTFAILED: i32 = 1137;
pub const PANDAKILL: i32 = 1144;
pub const NOPROXY: i32 = 1163;
pub const NOVOMSPROXY: i32 = 1177;
pub const KILLSIGNAL: i32 = 1200;
pub const SIGTERM: i32 = 1201;
pub const SIGQUIT: i32 = 1202;
pub const SIGSEGV: i32 = 1203;
pub const SIGXCPU: i32 = 1204;
pub const USERKILL: i32 = 1205;
pub const SIGBUS: i32 = 1206;
pub const SIGUSR1: i32 = 1207;
pub const SIGINT: i32 = 1208;
pub const REACHEDMAXTIME: i32 = 1213;
pub const CERTIFICATEHASEXPIRED: i32 = 1235;
pub const PROXYABOUTTOEXPIRE: i32 = 1298;
pub const PAYLOADEXECUTIONFAILURE: i32 = 1305;
pub const JOBDEFINITION: i32 = 1322;
pub const GETJOBREQUESTS: i32 = 1340;
pub const SECRETS: i32 = 1351;
pub const PROXYREPLACEMENT: i32 = 1352;
pub const LEASETIME: i32 = 1375;

/// Human-readable diagnostic for a pilot error code.
pub fn diagnostic(code: i32) -> &'static str {
    match code.abs() {
        GENERALERROR => "General pilot error",
        NOLOCALSPACE => "Not enough local space",
        STAGEINFAILED => "Failed to stage-in file",
        MKDIR => "Failed to create local directory",
        STAGEOUTFAILED => "Failed to stage-out file",
        PANDAKILL => "This job was killed by the dispatcher",
        NOPROXY => "Grid proxy not valid",
        NOVOMSPROXY => "Voms proxy not valid",
        KILLSIGNAL => "Job terminated by unknown kill signal",
        SIGTERM => "Job killed by signal: SIGTERM",
        SIGQUIT => "Job killed by signal: SIGQUIT",
        SIGSEGV => "Job killed by signal: SIGSEGV",
        SIGXCPU => "Job killed by signal: SIGXCPU",
        USERKILL => "Job killed by user",
        SIGBUS => "Job killed by signal: SIGBUS",
        SIGUSR1 => "Job killed by signal: SIGUSR1",
        SIGINT => "Job killed by signal: SIGINT",
        REACHEDMAXTIME => "Reached maximum batch queue time limit",
        CERTIFICATEHASEXPIRED => "Certificate has expired",
        PROXYABOUTTOEXPIRE => "Proxy is about to expire",
        PAYLOADEXECUTIONFAILURE => "Failed to execute payload",
        JOBDEFINITION => "Job definition could not be interpreted",
        GETJOBREQUESTS => "Reached maximum number of getJob requests",
        SECRETS => "Failed to isolate job secrets",
        PROXYREPLACEMENT => "Failed to replace proxy for user job",
        LEASETIME => "Lease time is up",
        _ => "Unknown pilot error",
    }
}

/// Error code for a kill signal observed by the pilot.
pub fn signal_error_code(signal: &str) -> i32 {
    match signal {
        "SIGTERM" => SIGTERM,
        "SIGQUIT" => SIGQUIT,
        "SIGSEGV" => SIGSEGV,
        "SIGXCPU" => SIGXCPU,
        "SIGBUS" => SIGBUS,
        "SIGUSR1" => SIGUSR1,
        "SIGINT" => SIGINT,
        _ => KILLSIGNAL,
    }
}

/// Proxy verification codes that must stop the pilot rather than the job.
pub fn is_fatal_proxy_code(code: i32) -> bool {
    matches!(code, NOPROXY | NOVOMSPROXY | CERTIFICATEHASEXPIRED)
}

pub fn default_kill_now_codes() -> Vec<i32> {
    vec![PANDAKILL, USERKILL, NOLOCALSPACE, CERTIFICATEHASEXPIRED, NOVOMSPROXY]
}

pub fn default_near_expiry_codes() -> Vec<i32> {
    vec![PROXYABOUTTOEXPIRE]
}

pub fn default_lease_expiry_codes() -> Vec<i32> {
    vec![LEASETIME]
}

pub fn default_recoverable_codes() -> Vec<i32> {
    vec![
        NOLOCALSPACE,
        STAGEINFAILED,
        STAGEOUTFAILED,
        MKDIR,
        KILLSIGNAL,
        SIGTERM,
        SIGQUIT,
        SIGXCPU,
        SIGUSR1,
        SIGINT,
        REACHEDMAXTIME,
        LEASETIME,
    ]
}

/// What the job monitor should do about a health-probe exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeClass {
    Healthy,
    /// Credentials about to expire; try a refresh first.
    NearExpiry,
    /// Kill the payload and fail the job.
    KillNow,
    /// Stager lease ran out; stage out the log and finish.
    LeaseExpired,
    /// Any other failure.
    Fatal,
}

/// Classification of error codes, built from `[monitor.codes]`.
#[derive(Debug, Clone)]
pub struct CodeTable {
    kill_now: HashSet<i32>,
    near_expiry: HashSet<i32>,
    lease_expiry: HashSet<i32>,
    recoverable: HashSet<i32>,
}

impl CodeTable {
    pub fn from_config(codes: &CodesSection) -> Self {
        Self {
            kill_now: codes.kill_now.iter().copied().collect(),
            near_expiry: codes.near_expiry.iter().copied().collect(),
            lease_expiry: codes.lease_expiry.iter().copied().collect(),
            recoverable: codes.recoverable.iter().copied().collect(),
        }
    }

    pub fn classify(&self, exit_code: i32) -> ProbeClass {
        if exit_code == 0 {
            ProbeClass::Healthy
        } else if self.near_expiry.contains(&exit_code) {
            ProbeClass::NearExpiry
        } else if self.kill_now.contains(&exit_code) {
            ProbeClass::KillNow
        } else if self.lease_expiry.contains(&exit_code) {
            ProbeClass::LeaseExpired
        } else {
            ProbeClass::Fatal
        }
    }

    pub fn is_recoverable(&self, code: i32) -> bool {
        self.recoverable.contains(&code.abs())
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::from_config(&CodesSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_classifies_probe_codes() {
        let table = CodeTable::default();
        assert_eq!(table.classify(0), ProbeClass::Healthy);
        assert_eq!(table.classify(PROXYABOUTTOEXPIRE), ProbeClass::NearExpiry);
        assert_eq!(table.classify(PANDAKILL), ProbeClass::KillNow);
        assert_eq!(table.classify(LEASETIME), ProbeClass::LeaseExpired);
        assert_eq!(table.classify(GENERALERROR), ProbeClass::Fatal);
    }

    #[test]
    fn recoverable_ignores_sign() {
        let table = CodeTable::default();
        assert!(table.is_recoverable(STAGEINFAILED));
        assert!(table.is_recoverable(-STAGEINFAILED));
        assert!(!table.is_recoverable(PAYLOADEXECUTIONFAILURE));
    }

    #[test]
    fn unknown_signal_maps_to_generic_kill_code() {
        assert_eq!(signal_error_code("SIGTERM"), SIGTERM);
        assert_eq!(signal_error_code("SIGHUP"), KILLSIGNAL);
    }
}
