// src/stages/mod.rs

//! The long-running pipeline stages.
//!
//! Each stage is an `async fn run(ctx)` that loops until the control flags
//! tell it to stop. Jobs move between stages only through the queues in
//! [`crate::engine::Queues`].

pub mod acquisition;
pub mod data_handoff;
pub mod eligibility;
pub mod job_monitor;
pub mod listener;
pub mod queue_monitor;
pub mod validation;

pub use job_monitor::fail_job;
pub use listener::{BrokerMessage, ChannelBroker, MessageBroker, StdinBroker};
