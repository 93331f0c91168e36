// src/workernode.rs

//! Facts about the worker node reported to the dispatcher.

use std::path::Path;

use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, warn};

/// Batch systems and the variable holding their job id.
const BATCH_ID_VARS: &[(&str, &str)] = &[
    ("SLURM", "SLURM_JOB_ID"),
    ("PBS", "PBS_JOBID"),
    ("LSF", "LSB_JOBID"),
    ("CONDOR", "CONDOR_JOBID"),
    ("SGE", "JOB_ID"),
];

#[derive(Debug, Clone, Default)]
pub struct WorkerNode {
    pub name: String,
    /// Clock speed of the first CPU, in MHz.
    pub cpu_mhz: f64,
    /// Total memory, in MB.
    pub mem_mb: f64,
    pub batch_system: Option<String>,
    pub batch_id: Option<String>,
}

impl WorkerNode {
    pub fn collect() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        system.refresh_memory();

        let cpu_mhz = system
            .cpus()
            .first()
            .map(|cpu| cpu.frequency() as f64)
            .unwrap_or_default();
        let mem_mb = system.total_memory() as f64 / (1024.0 * 1024.0);
        let name = System::host_name().unwrap_or_else(|| "unknown".to_string());

        let (batch_system, batch_id) = BATCH_ID_VARS
            .iter()
            .find_map(|(system, var)| {
                std::env::var(var)
                    .ok()
                    .map(|id| (Some(system.to_string()), Some(id)))
            })
            .unwrap_or((None, None));

        let node = Self {
            name,
            cpu_mhz,
            mem_mb,
            batch_system,
            batch_id,
        };
        debug!(?node, "collected worker node info");
        node
    }
}

/// Free space, in MB, on the disk holding `path`.
///
/// Picks the most specific mount point containing the path.
pub fn available_disk_space_mb(path: &Path) -> Option<u64> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let mut best: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let depth = mount.components().count();
            if best.is_none_or(|(_, d)| depth > d) {
                best = Some((disk, depth));
            }
        }
    }

    match best {
        Some((disk, _)) => Some(disk.available_space() / (1024 * 1024)),
        None => {
            warn!(path = %path.display(), "no disk found for path");
            None
        }
    }
}
