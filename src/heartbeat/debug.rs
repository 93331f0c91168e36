// src/heartbeat/debug.rs

//! Output of the debug command attached to heartbeats in debug mode.

use std::path::Path;

use tracing::{debug, warn};

use crate::exec::command::run_captured;

use super::backchannel::is_allowed_debug_command;

/// Resolve the command to run. A bare `tail` (no file argument) reads the
/// payload stdout.
pub fn resolve_debug_command(command: Option<&str>, payload_stdout: &Path) -> String {
    let command = command.unwrap_or("tail").trim();
    let mut words = command.split_whitespace();
    let is_tail = words.next() == Some("tail");
    let has_file = words.any(|w| !w.starts_with('-') && w.parse::<i64>().is_err());
    if is_tail && !has_file {
        format!("{command} {}", payload_stdout.display())
    } else {
        command.to_string()
    }
}

/// Keep the last `limit` bytes of `output`, on a character boundary.
pub fn cap_output(output: &str, limit: usize) -> String {
    if output.len() <= limit {
        return output.to_string();
    }
    let mut start = output.len() - limit;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

/// Run the debug command in the job workdir and return its capped output.
pub async fn debug_output(
    command: Option<&str>,
    workdir: &Path,
    payload_stdout: &Path,
    limit: usize,
) -> Option<String> {
    let command = resolve_debug_command(command, payload_stdout);
    if !is_allowed_debug_command(&command) {
        warn!(command, "refusing to run debug command");
        return None;
    }
    match run_captured(&command, Some(workdir), &[]).await {
        Ok(output) => {
            debug!(command, exit_code = output.exit_code, "debug command finished");
            let mut text = output.stdout;
            text.push_str(&output.stderr);
            Some(cap_output(&text, limit))
        }
        Err(e) => {
            warn!(command, error = %e, "debug command failed");
            None
        }
    }
}
