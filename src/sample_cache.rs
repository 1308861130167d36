// Latest value per metric key. Not persisted; lives as long as the process.

use crate::models::{Sample, SampleValue};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct SampleCache {
    latest: RwLock<HashMap<String, Sample>>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally replaces the cached sample for `sample.metric_key`.
    pub async fn put(&self, sample: Sample) {
        self.latest
            .write()
            .await
            .insert(sample.metric_key.clone(), sample);
    }

    pub async fn get(&self, metric_key: &str) -> Option<Sample> {
        self.latest.read().await.get(metric_key).cloned()
    }

    pub async fn get_number(&self, metric_key: &str) -> Option<f64> {
        self.latest
            .read()
            .await
            .get(metric_key)
            .and_then(|s| s.value.as_number())
    }

    /// Copy of every cached sample, keyed by metric.
    pub async fn snapshot(&self) -> HashMap<String, Sample> {
        self.latest.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.latest.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.latest.read().await.is_empty()
    }
}

/// Convenience for callers holding a snapshot rather than the cache.
pub fn number_of(snapshot: &HashMap<String, Sample>, metric_key: &str) -> Option<f64> {
    snapshot.get(metric_key).map(|s| &s.value).and_then(SampleValue::as_number)
}
