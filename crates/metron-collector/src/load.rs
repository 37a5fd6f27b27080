use crate::Collector;
use anyhow::Result;
use metron_common::types::Metric;
use sysinfo::System;

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let load = System::load_average();
        Ok(vec![
            Metric::gauge("LoadAverage1", load.one),
            Metric::gauge("LoadAverage5", load.five),
            Metric::gauge("LoadAverage15", load.fifteen),
            Metric::gauge("Uptime", System::uptime() as f64),
        ])
    }
}
