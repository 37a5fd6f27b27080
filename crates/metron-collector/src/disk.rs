use crate::{percent, Collector};
use anyhow::Result;
use metron_common::types::Metric;
use sysinfo::Disks;

/// Space summed over all mounted disks.
pub struct DiskCollector {
    disks: Disks,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.disks.refresh();

        let (total, available) = self.disks.iter().fold((0u64, 0u64), |(t, a), disk| {
            (
                t.saturating_add(disk.total_space()),
                a.saturating_add(disk.available_space()),
            )
        });
        let used = total.saturating_sub(available);

        Ok(vec![
            Metric::gauge("TotalDisk", total as f64),
            Metric::gauge("FreeDisk", available as f64),
            Metric::gauge("DiskUsedPercent", percent(used, total)),
        ])
    }
}
