// src/heartbeat/reconcile.rs

use tracing::info;

use crate::job::errorcodes::CodeTable;
use crate::job::Job;

/// Settle the primary error code before a final update.
///
/// A job that only has entries in its error list gets the first one as its
/// primary code. Analysis jobs failing with a recoverable code are reported
/// with the code negated, which tells the server the job may be retried.
pub fn verify_error_code(job: &mut Job, table: &CodeTable) {
    if job.piloterrorcode == 0 {
        if let Some((code, diag)) = job.piloterrorcodes.first().cloned() {
            job.piloterrorcode = code;
            job.piloterrordiag = diag;
        }
    }

    if job.piloterrorcode != 0 && job.is_analysis() && table.is_recoverable(job.piloterrorcode) {
        if job.piloterrorcode > 0 {
            info!(jobid = %job.jobid, code = job.piloterrorcode, "recoverable error for analysis job, flagging for retry");
            job.piloterrorcode = -job.piloterrorcode;
        }
        job.force_failed();
    }
}
