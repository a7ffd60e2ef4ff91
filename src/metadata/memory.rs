//! In-memory tag index

use crate::error::MetadataError;
use crate::metadata::{Context, MetadataApi};
use crate::types::{MetricKey, TagSet, TaggedMetric};
use async_trait::async_trait;
use dashmap::DashMap;

/// Tag index held in a concurrent map
///
/// Each metric key maps to its distinct tag sets in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    metrics: DashMap<MetricKey, Vec<TagSet>>,
}

impl InMemoryMetadata {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered metric keys
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    fn insert(&self, metric: &TaggedMetric) {
        let mut tag_sets = self.metrics.entry(metric.metric_key.clone()).or_default();
        if !tag_sets.contains(&metric.tag_set) {
            tag_sets.push(metric.tag_set.clone());
        }
    }
}

#[async_trait]
impl MetadataApi for InMemoryMetadata {
    async fn add_metric(&self, metric: &TaggedMetric, _ctx: &Context) -> Result<(), MetadataError> {
        self.insert(metric);
        Ok(())
    }

    async fn add_metrics(
        &self,
        metrics: &[TaggedMetric],
        _ctx: &Context,
    ) -> Result<(), MetadataError> {
        for metric in metrics {
            self.insert(metric);
        }
        Ok(())
    }

    async fn remove_metric(
        &self,
        metric: &TaggedMetric,
        _ctx: &Context,
    ) -> Result<(), MetadataError> {
        let now_empty = match self.metrics.get_mut(&metric.metric_key) {
            Some(mut tag_sets) => {
                tag_sets.retain(|t| t != &metric.tag_set);
                tag_sets.is_empty()
            }
            None => return Err(MetadataError::NoSuchMetric(metric.metric_key.to_string())),
        };
        if now_empty {
            self.metrics
                .remove_if(&metric.metric_key, |_, tag_sets| tag_sets.is_empty());
        }
        Ok(())
    }

    async fn get_all_tags(
        &self,
        metric_key: &MetricKey,
        _ctx: &Context,
    ) -> Result<Vec<TagSet>, MetadataError> {
        self.metrics
            .get(metric_key)
            .map(|tag_sets| tag_sets.clone())
            .ok_or_else(|| MetadataError::NoSuchMetric(metric_key.to_string()))
    }

    async fn get_all_metrics(&self, _ctx: &Context) -> Result<Vec<MetricKey>, MetadataError> {
        let mut keys: Vec<MetricKey> = self.metrics.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_metrics_for_tag(
        &self,
        tag_key: &str,
        tag_value: &str,
        _ctx: &Context,
    ) -> Result<Vec<MetricKey>, MetadataError> {
        let mut keys: Vec<MetricKey> = self
            .metrics
            .iter()
            .filter(|e| e.value().iter().any(|t| t.get(tag_key) == Some(tag_value)))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
