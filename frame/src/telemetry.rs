//! Process telemetry

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Process metrics shown on the status page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Resident memory in MiB, one decimal
    pub memory_mb: f64,

    /// Process uptime in seconds
    pub uptime_secs: u64,

    pub hostname: String,
}

/// Resident memory of this process in MiB
pub fn process_memory_mb() -> Option<f64> {
    collect_process_metrics().map(|m| m.memory_mb)
}

/// Collect metrics for this process
pub fn collect_process_metrics() -> Option<ProcessMetrics> {
    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );

    let process = sys.process(pid)?;
    let memory_mb = (process.memory() as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0;

    Some(ProcessMetrics {
        memory_mb,
        uptime_secs: process.run_time(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    })
}
