//! Metric collection for the metron agent.
//!
//! Each [`Collector`] reads one family of host or process statistics and
//! returns them as gauges. [`MetricSampler`] runs every registered collector
//! on a poll tick and applies the result to the agent's local table as one
//! batch.

pub mod cpu;
pub mod disk;
pub mod load;
pub mod memory;
pub mod network;
pub mod process;
pub mod sampler;

pub use sampler::MetricSampler;

use anyhow::Result;
use metron_common::types::Metric;

/// A source of gauge readings on the agent host.
///
/// Collectors keep their own `sysinfo` handles between ticks, so `collect`
/// takes `&mut self`. The trait requires `Send` so the sampler can be moved
/// into the poll task.
pub trait Collector: Send {
    /// Short family name (e.g. `"cpu"`), used in logs.
    fn name(&self) -> &str;

    /// Reads current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API is unavailable; the
    /// sampler skips this collector for the tick.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}

/// Returns every built-in collector.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(memory::MemoryCollector::new()),
        Box::new(cpu::CpuCollector::new()),
        Box::new(load::LoadCollector::new()),
        Box::new(disk::DiskCollector::new()),
        Box::new(network::NetworkCollector::new()),
        Box::new(process::ProcessCollector::new()),
    ]
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
