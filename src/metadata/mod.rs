//! Tag-index metadata interface
//!
//! The tag index maps metric keys to the tag sets of their series. The
//! engine only depends on the [`MetadataApi`] shape; [`InMemoryMetadata`] is
//! a self-contained backend and [`CachedMetadata`] fronts any backend with a
//! staleness-aware cache.

pub mod cache;
pub mod memory;

pub use cache::{BackgroundAction, CacheConfig, CachedMetadata, CachedTagSetList};
pub use memory::InMemoryMetadata;

use crate::error::MetadataError;
use crate::profile::Profiler;
use crate::types::{MetricKey, TagSet, TaggedMetric};
use async_trait::async_trait;
use std::sync::Arc;

/// Per-call context handed to metadata operations
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Optional timing sink
    pub profiler: Option<Arc<Profiler>>,
}

impl Context {
    /// Context with a profiler attached
    pub fn with_profiler(profiler: Arc<Profiler>) -> Self {
        Self {
            profiler: Some(profiler),
        }
    }
}

/// Tag-index operations
#[async_trait]
pub trait MetadataApi: Send + Sync + 'static {
    /// Register one series
    async fn add_metric(&self, metric: &TaggedMetric, ctx: &Context) -> Result<(), MetadataError>;

    /// Register several series
    async fn add_metrics(
        &self,
        metrics: &[TaggedMetric],
        ctx: &Context,
    ) -> Result<(), MetadataError>;

    /// Forget one series
    async fn remove_metric(
        &self,
        metric: &TaggedMetric,
        ctx: &Context,
    ) -> Result<(), MetadataError>;

    /// Every tag set registered for `metric_key`
    ///
    /// Fails with `MetadataError::NoSuchMetric` for an unknown key.
    async fn get_all_tags(
        &self,
        metric_key: &MetricKey,
        ctx: &Context,
    ) -> Result<Vec<TagSet>, MetadataError>;

    /// Every registered metric key
    async fn get_all_metrics(&self, ctx: &Context) -> Result<Vec<MetricKey>, MetadataError>;

    /// Metric keys with at least one series tagged `tag_key=tag_value`
    async fn get_metrics_for_tag(
        &self,
        tag_key: &str,
        tag_value: &str,
        ctx: &Context,
    ) -> Result<Vec<MetricKey>, MetadataError>;
}
