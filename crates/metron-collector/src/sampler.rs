use crate::Collector;
use metron_common::types::Metric;
use metron_storage::{Storage, StorageError};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Runs the registered collectors on each poll tick.
///
/// One poll produces every collector's gauges, a fresh `RandomValue` in
/// `[0, 1)` and a `PollCount` increment of 1, and applies them to the local
/// table with a single `save_batch`, so the reporter never sees a half-applied
/// poll.
pub struct MetricSampler {
    collectors: Vec<Box<dyn Collector>>,
}

impl MetricSampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// Samples every collector. A collector that fails is logged and left out
    /// of this tick.
    pub fn sample(&mut self) -> Vec<Metric> {
        let mut batch = Vec::new();
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(gauges) => batch.extend(gauges),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collector failed");
                }
            }
        }
        // Some platforms report NaN before a baseline exists.
        batch.retain(|m| m.value.map_or(true, f64::is_finite));
        batch.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));
        batch.push(Metric::counter(POLL_COUNT, 1));
        batch
    }

    /// Samples and applies the result to `store` as one batch. Returns the
    /// number of metrics written.
    pub async fn poll(&mut self, store: &dyn Storage) -> Result<usize, StorageError> {
        let batch = self.sample();
        store.save_batch(&batch).await?;
        tracing::debug!(metrics = batch.len(), "Poll applied");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use metron_storage::MemStorage;

    struct Fixed;

    impl Collector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> Result<Vec<Metric>> {
            Ok(vec![
                Metric::gauge("Alloc", 42.0),
                Metric::gauge("Broken", f64::NAN),
            ])
        }
    }

    struct Failing;

    impl Collector for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn collect(&mut self) -> Result<Vec<Metric>> {
            Err(anyhow!("stats unavailable"))
        }
    }

    #[tokio::test]
    async fn poll_increments_poll_count_and_sets_gauges() {
        let store = MemStorage::new();
        let mut sampler = MetricSampler::new(vec![Box::new(Failing), Box::new(Fixed)]);

        for _ in 0..3 {
            sampler.poll(&store).await.unwrap();
        }

        assert_eq!(store.get_counter(POLL_COUNT).await.unwrap(), 3);
        assert_eq!(store.get_gauge("Alloc").await.unwrap(), 42.0);
        assert!(store.get_gauge("Broken").await.unwrap_err().is_not_found());

        let random = store.get_gauge(RANDOM_VALUE).await.unwrap();
        assert!((0.0..1.0).contains(&random));
    }

    #[test]
    fn sample_ends_with_random_and_poll_count() {
        let mut sampler = MetricSampler::new(Vec::new());
        let batch = sampler.sample();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, RANDOM_VALUE);
        assert_eq!(batch[1], Metric::counter(POLL_COUNT, 1));
    }

    #[test]
    fn builtin_collectors_produce_valid_gauges() {
        let mut sampler = MetricSampler::new(crate::default_collectors());
        let batch = sampler.sample();
        assert!(batch.iter().all(|m| m.validate().is_ok()));
        assert!(batch.iter().any(|m| m.id == "TotalMemory"));
        assert!(batch.iter().any(|m| m.id == "LoadAverage1"));
    }
}
