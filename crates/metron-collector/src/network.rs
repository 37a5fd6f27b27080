use crate::Collector;
use anyhow::Result;
use metron_common::types::Metric;
use sysinfo::Networks;

/// Bytes moved across all interfaces since the previous tick.
pub struct NetworkCollector {
    networks: Networks,
    prev: Option<(u64, u64)>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            prev: None,
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.networks.refresh();

        let (received, transmitted) =
            self.networks
                .iter()
                .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                    (
                        rx.saturating_add(data.total_received()),
                        tx.saturating_add(data.total_transmitted()),
                    )
                });

        // First tick has no baseline and reports zero.
        let (prev_rx, prev_tx) = self.prev.unwrap_or((received, transmitted));
        self.prev = Some((received, transmitted));

        Ok(vec![
            Metric::gauge("NetworkBytesReceived", received.saturating_sub(prev_rx) as f64),
            Metric::gauge("NetworkBytesSent", transmitted.saturating_sub(prev_tx) as f64),
        ])
    }
}
