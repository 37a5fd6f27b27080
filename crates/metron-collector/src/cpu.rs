use crate::Collector;
use anyhow::Result;
use metron_common::types::Metric;
use sysinfo::System;

/// Global and per-core utilization. Core gauges are named
/// `CPUutilization1`, `CPUutilization2`, ...
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_all();

        let cpus = self.system.cpus();
        let mut gauges = Vec::with_capacity(cpus.len() + 2);
        gauges.push(Metric::gauge(
            "CPUUtilization",
            self.system.global_cpu_usage() as f64,
        ));
        gauges.push(Metric::gauge("CPUCount", cpus.len() as f64));
        for (i, cpu) in cpus.iter().enumerate() {
            gauges.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(gauges)
    }
}
