//! Multi-resolution fetch pipeline
//!
//! ```text
//! FetchMultipleRequest
//!        │
//!        ▼
//!   planner ──▶ [(tier, interval), ...]
//!        │
//!        ▼
//!   ParallelQueue (per request) ──▶ ParallelQueue (per series) ──▶ RollupClient
//!        │
//!        ▼
//!   sampler ──▶ SeriesList
//! ```
//!
//! - [`resolution`]: tier definitions and YAML loading
//! - [`planner`]: splitting an interval across tiers
//! - [`sampler`]: aligning raw points to slots
//! - [`parallel`]: bounded-parallel queue and shared timeout
//! - [`executor`]: [`RollupStorage`], the [`TimeseriesStorage`] implementation

pub mod executor;
pub mod parallel;
pub mod planner;
pub mod resolution;
pub mod sampler;

pub use executor::{RollupStorage, RollupStorageConfig};
pub use parallel::{ParallelQueue, Timeout};
pub use planner::{choose_resolution, plan, plan_with_only_finer, FetchPlan, PlannedInterval};
pub use resolution::Resolution;

use crate::error::{Error, Result};
use crate::profile::Profiler;
use crate::timerange::Timerange;
use crate::types::{SampleMethod, SeriesList, TaggedMetric, Timeseries};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Fetch limit
// =============================================================================

/// Caller-imposed budget on the number of series fetched
///
/// Clones share the same budget, so one limit can span several requests.
#[derive(Debug, Clone)]
pub struct FetchLimit {
    used: Arc<AtomicUsize>,
    limit: usize,
}

impl FetchLimit {
    /// Budget of `limit` series
    pub fn new(limit: usize) -> Self {
        Self {
            used: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Consume `count` from the budget
    ///
    /// # Errors
    ///
    /// Returns `Error::Limit` if the running total would exceed the budget.
    /// A rejected request consumes nothing.
    pub fn consume(&self, count: usize) -> Result<()> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let requested = current.saturating_add(count);
            if requested > self.limit {
                return Err(Error::Limit {
                    requested,
                    limit: self.limit,
                });
            }
            match self.used.compare_exchange_weak(
                current,
                requested,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Series consumed so far
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Configured budget
    pub fn limit(&self) -> usize {
        self.limit
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Fetch of several series over one timerange
#[derive(Debug, Clone)]
pub struct FetchMultipleRequest {
    /// Series to fetch; output order matches
    pub metrics: Vec<TaggedMetric>,
    /// Output alignment
    pub timerange: Timerange,
    /// Slot reduction
    pub sample_method: SampleMethod,
    /// Deadline shared by every sub-request
    pub timeout: Timeout,
    /// Optional timing sink
    pub profiler: Option<Arc<Profiler>>,
    /// Optional budget on series fetched
    pub fetch_limit: Option<FetchLimit>,
}

impl FetchMultipleRequest {
    /// Create a request with no profiler and no limit
    pub fn new(
        metrics: Vec<TaggedMetric>,
        timerange: Timerange,
        sample_method: SampleMethod,
        timeout: Timeout,
    ) -> Self {
        Self {
            metrics,
            timerange,
            sample_method,
            timeout,
            profiler: None,
            fetch_limit: None,
        }
    }

    /// Attach a profiler
    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Attach a fetch budget
    pub fn with_fetch_limit(mut self, limit: FetchLimit) -> Self {
        self.fetch_limit = Some(limit);
        self
    }
}

/// Fetch of one series
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Series to fetch
    pub metric: TaggedMetric,
    /// Output alignment
    pub timerange: Timerange,
    /// Slot reduction
    pub sample_method: SampleMethod,
    /// Deadline shared by every sub-request
    pub timeout: Timeout,
    /// Optional timing sink
    pub profiler: Option<Arc<Profiler>>,
    /// Optional budget on series fetched
    pub fetch_limit: Option<FetchLimit>,
}

impl FetchRequest {
    /// Create a request with no profiler and no limit
    pub fn new(
        metric: TaggedMetric,
        timerange: Timerange,
        sample_method: SampleMethod,
        timeout: Timeout,
    ) -> Self {
        Self {
            metric,
            timerange,
            sample_method,
            timeout,
            profiler: None,
            fetch_limit: None,
        }
    }

    /// The equivalent single-metric multi-fetch
    pub fn into_multiple(self) -> FetchMultipleRequest {
        FetchMultipleRequest {
            metrics: vec![self.metric],
            timerange: self.timerange,
            sample_method: self.sample_method,
            timeout: self.timeout,
            profiler: self.profiler,
            fetch_limit: self.fetch_limit,
        }
    }
}

// =============================================================================
// Storage trait
// =============================================================================

/// Source of aligned time series
#[async_trait]
pub trait TimeseriesStorage: Send + Sync + 'static {
    /// Fetch one series aligned to the request's timerange
    async fn fetch_single_timeseries(&self, request: FetchRequest) -> Result<Timeseries>;

    /// Fetch several series; output order matches `request.metrics`
    async fn fetch_multiple_timeseries(&self, request: FetchMultipleRequest) -> Result<SeriesList>;

    /// Finest tier at least `lower_bound` wide that can serve `timerange`
    fn choose_resolution(
        &self,
        timerange: &Timerange,
        lower_bound: Duration,
    ) -> Result<Resolution>;

    /// Probe the underlying store
    async fn check_healthy(&self) -> Result<()>;
}
