// src/heartbeat/state.rs

use crate::types::{JobState, ServerState};

/// The state to report to the dispatcher, given what it last accepted and
/// the state the pipeline wants to send.
///
/// The server must see `starting` before anything else, and every
/// non-terminal internal state other than `holding` is `running` to it.
pub fn get_proper_state(server_state: ServerState, state: JobState) -> ServerState {
    match state {
        JobState::Finished => ServerState::Finished,
        JobState::Failed => ServerState::Failed,
        _ if server_state == ServerState::Unset => ServerState::Starting,
        JobState::Holding => ServerState::Holding,
        _ => ServerState::Running,
    }
}
