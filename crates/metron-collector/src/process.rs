use crate::Collector;
use anyhow::{anyhow, Result};
use metron_common::types::Metric;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Statistics of the agent process itself.
pub struct ProcessCollector {
    system: System,
    pid: Option<Pid>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!(error = e, "Cannot resolve own pid, process gauges disabled"))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let pid = self.pid.ok_or_else(|| anyhow!("own pid unavailable"))?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;

        let disk = process.disk_usage();
        Ok(vec![
            Metric::gauge("ProcessMemory", process.memory() as f64),
            Metric::gauge("ProcessVirtualMemory", process.virtual_memory() as f64),
            Metric::gauge("ProcessCPU", process.cpu_usage() as f64),
            Metric::gauge("ProcessRunTime", process.run_time() as f64),
            Metric::gauge("ProcessDiskRead", disk.total_read_bytes as f64),
            Metric::gauge("ProcessDiskWritten", disk.total_written_bytes as f64),
        ])
    }
}
