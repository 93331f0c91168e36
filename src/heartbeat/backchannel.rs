// src/heartbeat/backchannel.rs

//! Commands the dispatcher piggybacks on `updateJob` replies.

use std::sync::LazyLock;

use regex::Regex;

/// Verbs a debug command may start with.
pub const ALLOWED_DEBUG_VERBS: &[&str] = &["tail", "ls", "ps", "gdb", "du"];

static COMMAND_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i);|%3b").expect("separator pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackchannelCommand {
    /// Turn on debug mode and run this command for each heartbeat.
    Debug(String),
    /// A debug command that failed the filter.
    RejectedDebug(String),
    ToBeKilled,
    SoftKill,
    DebugOn,
    DebugOff,
    NoCleanup,
    Unknown(String),
}

/// Whether `command` may be run as a debug command.
pub fn is_allowed_debug_command(command: &str) -> bool {
    if COMMAND_SEPARATOR.is_match(command) {
        return false;
    }
    match command.split_whitespace().next() {
        Some("rm") | None => false,
        Some(verb) => ALLOWED_DEBUG_VERBS.contains(&verb),
    }
}

/// Decode the raw `command` field of a reply.
pub fn parse_command(raw: &str) -> Vec<BackchannelCommand> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NULL" {
        return Vec::new();
    }

    if raw.contains(' ') && !raw.contains("tobekilled") {
        let command = raw.to_string();
        return if is_allowed_debug_command(&command) {
            vec![BackchannelCommand::Debug(command)]
        } else {
            vec![BackchannelCommand::RejectedDebug(command)]
        };
    }

    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token {
            "tobekilled" => BackchannelCommand::ToBeKilled,
            "softkill" => BackchannelCommand::SoftKill,
            "debug" => BackchannelCommand::DebugOn,
            "debugoff" => BackchannelCommand::DebugOff,
            "nocleanup" => BackchannelCommand::NoCleanup,
            other => BackchannelCommand::Unknown(other.to_string()),
        })
        .collect()
}
