// src/exec/mod.rs

//! Execution layer: the collaborators the pipeline drives and the default
//! stages that run transfers and payloads.
//!
//! - [`backend`] defines the collaborator traits and the [`Collaborators`] bundle.
//! - [`local`] holds the command and sysinfo based implementations.
//! - [`command`] has the shell helpers they share.
//! - [`executor_loop`] runs stage-in, stage-out and failure forwarding.
//! - [`task_runner`] starts payloads and routes them by exit status.

pub mod backend;
pub mod command;
pub mod executor_loop;
pub mod local;
pub mod task_runner;

pub use backend::{
    Collaborators, DiskSpace, HealthProbe, PayloadTarget, ProcessControl, ProxyManager,
    TransferBackend, TransferTarget,
};
