// src/lib.rs

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod heartbeat;
pub mod job;
pub mod logging;
pub mod site;
pub mod stages;
pub mod types;
pub mod workernode;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_from_path};
use crate::config::model::ConfigFile;
use crate::dispatcher::{Dispatcher, HttpDispatcher};
use crate::engine::signals::install_signal_handlers;
use crate::engine::{StageContext, Supervisor, SupervisorReport};
use crate::exec::Collaborators;
use crate::fs::RealFileSystem;
use crate::site::policy_for;
use crate::stages::{MessageBroker, StdinBroker};
use crate::types::JobSource;
use crate::workernode::WorkerNode;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading (with CLI overrides) and logging
/// - dispatcher transport, site policy and default collaborators
/// - signal handling
/// - the supervised pipeline stages
pub async fn run(args: CliArgs) -> Result<i32> {
    let config = load_config(&args)?;

    if args.dry_run {
        logging::init_logging(args.log_level, None)?;
        print_dry_run(&config);
        return Ok(0);
    }

    std::fs::create_dir_all(&config.pilot.pilot_home)
        .with_context(|| format!("creating pilot home {}", config.pilot.pilot_home.display()))?;
    let pilot_log = config.pilot.pilot_home.join(&config.pilot.pilot_log);
    logging::init_logging(args.log_level, Some(&pilot_log))?;

    let site = policy_for(&config.pilot.site_policy)?;
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(&config.dispatcher)?);
    let collab = Collaborators::local(&config);
    let node = WorkerNode::collect();
    info!(
        site = %config.pilot.site,
        queue = %config.pilot.queue,
        node = %node.name,
        policy = site.name(),
        "pilot starting"
    );

    let ctx = Arc::new(
        StageContext::new(config, dispatcher, site, collab, Arc::new(RealFileSystem)).with_node(node),
    );
    let signals = install_signal_handlers(ctx.clone())?;

    let broker: Option<Arc<dyn MessageBroker>> = match ctx.config.acquisition.source {
        JobSource::Broker => Some(Arc::new(StdinBroker::new())),
        _ => None,
    };
    let report = run_pipeline(ctx, broker).await;
    signals.abort();

    Ok(report.exit_code())
}

/// Start every stage under a [`Supervisor`] and wait for the pilot to wind
/// down. The listener only runs when a broker is given.
pub async fn run_pipeline(
    ctx: Arc<StageContext>,
    broker: Option<Arc<dyn MessageBroker>>,
) -> SupervisorReport {
    let mut supervisor = Supervisor::new(ctx.clone());
    spawn_stages(&mut supervisor, &ctx, broker);
    supervisor.run().await
}

/// Register the pipeline stages with `supervisor`.
pub fn spawn_stages(
    supervisor: &mut Supervisor,
    ctx: &Arc<StageContext>,
    broker: Option<Arc<dyn MessageBroker>>,
) {
    supervisor.spawn("acquisition", stages::acquisition::run(ctx.clone()));
    supervisor.spawn("validation", stages::validation::run(ctx.clone()));
    supervisor.spawn("data_handoff", stages::data_handoff::run(ctx.clone()));
    supervisor.spawn("stage_in", exec::executor_loop::run_stagein(ctx.clone()));
    supervisor.spawn("payload", exec::task_runner::run(ctx.clone()));
    supervisor.spawn("stage_out", exec::executor_loop::run_stageout(ctx.clone()));
    supervisor.spawn("forwarding", exec::executor_loop::run_forwarding(ctx.clone()));
    supervisor.spawn("job_monitor", stages::job_monitor::run(ctx.clone()));
    supervisor.spawn("queue_monitor", stages::queue_monitor::run(ctx.clone()));
    if let Some(broker) = broker {
        supervisor.spawn("listener", stages::listener::run(ctx.clone(), broker));
    }
}

fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut raw = load_from_path(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    if let Some(site) = &args.site {
        raw.pilot.site = site.clone();
    }
    if let Some(queue) = &args.queue {
        raw.pilot.queue = queue.clone();
    }
    Ok(ConfigFile::try_from(raw)?)
}

/// Simple dry-run output: print the effective settings.
fn print_dry_run(cfg: &ConfigFile) {
    println!("jobpilot dry-run");
    println!("  pilot.site = {}", cfg.pilot.site);
    println!("  pilot.queue = {}", cfg.pilot.queue);
    println!("  pilot.site_policy = {}", cfg.pilot.site_policy);
    println!("  pilot.submit_mode = {:?}", cfg.pilot.submit_mode);
    println!("  pilot.workflow = {:?}", cfg.pilot.workflow);
    println!("  pilot.timefloor = {} min", cfg.pilot.timefloor);
    println!("  pilot.workdir = {}", cfg.pilot.workdir.display());
    println!();
    println!("  dispatcher = {}:{}", cfg.dispatcher.url, cfg.dispatcher.port);
    println!("  acquisition.source = {:?}", cfg.acquisition.source);
    println!(
        "  acquisition.max_getjob_requests = {}",
        cfg.effective_max_getjob_requests()
    );
    println!(
        "  acquisition.max_getjob_failures = {}",
        cfg.acquisition.max_getjob_failures
    );
    println!("  heartbeat.period_secs = {}", cfg.heartbeat.period_secs);
    println!("  monitor.loop_interval_ms = {}", cfg.monitor.loop_interval_ms);
    if let Some(probe) = &cfg.monitor.probe_command {
        println!("  monitor.probe_command = {probe}");
    }
    println!("  monitor.codes.kill_now = {:?}", cfg.monitor.codes.kill_now);
}
