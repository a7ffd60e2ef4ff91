//! Staleness-aware metadata cache
//!
//! Caches `get_all_tags` per metric key in front of any [`MetadataApi`].
//! Every entry carries an expiry of `stored_at + ttl` and is in one of three
//! states when read:
//!
//! ```text
//!   stored_at            stored_at + ttl - freshness       stored_at + ttl
//!       |-------- fresh --------|---------- stale ----------|--- expired ---
//!        serve                   serve + queue refresh        fetch inline
//! ```
//!
//! - **fresh**: served from the cache.
//! - **stale**: served from the cache; one background refresh is queued.
//!   The queue holds at most `request_limit` refreshes and drops the rest.
//! - **expired** (or absent): fetched inline. Concurrent callers for the
//!   same key share one backend request and all receive its result.
//!
//! A `freshness` of zero disables the stale state: entries are fresh until
//! they expire.
//!
//! Background refreshes are executed by whoever calls
//! [`CachedMetadata::get_background_action`], normally the
//! [`RefreshWorkers`](crate::services::RefreshWorkers) service.
//! [`CachedMetadata::close_refresh_queue`] stops new refreshes from being
//! queued; once the queue drains, `get_background_action` returns `None`.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, MetadataError, Result};
use crate::metadata::{Context, MetadataApi};
use crate::metrics;
use crate::types::{MetricKey, TagSet, TaggedMetric};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Cache tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which an entry is refreshed in the background; zero disables
    pub freshness: Duration,
    /// Age after which an entry is no longer served
    pub ttl: Duration,
    /// Capacity of the background refresh queue; zero disables refreshes
    pub request_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(5 * 60),
            ttl: Duration::from_secs(60 * 60),
            request_limit: 1000,
        }
    }
}

impl CacheConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::Configuration("cache ttl must be greater than 0".to_string()));
        }
        if !self.freshness.is_zero() && self.freshness >= self.ttl {
            return Err(Error::Configuration(format!(
                "cache freshness {:?} must be shorter than ttl {:?}",
                self.freshness, self.ttl
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Entries
// ============================================================================

/// One cached `get_all_tags` result
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTagSetList {
    /// Tag sets returned by the backend
    pub tag_sets: Arc<Vec<TagSet>>,
    /// Instant after which the entry is no longer served
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
    Expired,
}

type SharedFetch =
    Shared<BoxFuture<'static, std::result::Result<Arc<Vec<TagSet>>, MetadataError>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<MetricKey, CachedTagSetList>,
    inflight: HashMap<MetricKey, SharedFetch>,
}

struct CacheInner {
    backend: Arc<dyn MetadataApi>,
    clock: Arc<dyn Clock>,
    ttl: ChronoDuration,
    freshness: ChronoDuration,
    request_limit: usize,
    state: Mutex<CacheState>,
    refresh_tx: Mutex<Option<mpsc::Sender<MetricKey>>>,
    refresh_rx: tokio::sync::Mutex<Option<mpsc::Receiver<MetricKey>>>,
    queued: AtomicUsize,
}

impl CacheInner {
    fn classify(&self, entry: &CachedTagSetList, now: DateTime<Utc>) -> Freshness {
        if entry.expiry <= now {
            Freshness::Expired
        } else if self.freshness > ChronoDuration::zero()
            && entry.expiry - self.ttl + self.freshness <= now
        {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Store `tag_sets` unless the current entry already expires later
    fn store(&self, state: &mut CacheState, metric: MetricKey, tag_sets: Arc<Vec<TagSet>>) {
        let expiry = self.clock.now() + self.ttl;
        match state.entries.get(&metric) {
            Some(existing) if existing.expiry >= expiry => {
                debug!(metric = %metric, "Keeping newer cached tag sets");
            }
            _ => {
                state
                    .entries
                    .insert(metric, CachedTagSetList { tag_sets, expiry });
            }
        }
    }

    /// Join or start the single in-flight backend fetch for `metric`
    fn fetch(
        self: &Arc<Self>,
        state: &mut CacheState,
        metric: &MetricKey,
        ctx: &Context,
    ) -> SharedFetch {
        if let Some(inflight) = state.inflight.get(metric) {
            debug!(metric = %metric, "Joining in-flight tag fetch");
            return inflight.clone();
        }

        let inner = Arc::clone(self);
        let key = metric.clone();
        let ctx = ctx.clone();
        let fetch = async move {
            let result = inner.backend.get_all_tags(&key, &ctx).await.map(Arc::new);
            let mut state = inner.state.lock();
            state.inflight.remove(&key);
            if let Ok(tag_sets) = &result {
                inner.store(&mut state, key, Arc::clone(tag_sets));
            }
            result
        }
        .boxed()
        .shared();

        state.inflight.insert(metric.clone(), fetch.clone());
        fetch
    }

    fn enqueue_refresh(&self, metric: &MetricKey) {
        let tx = self.refresh_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return;
        };
        // Counted before sending so a receiver never decrements first
        self.queued.fetch_add(1, Ordering::AcqRel);
        let sent = tx.try_send(metric.clone());
        if sent.is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
        match sent {
            Ok(()) => debug!(metric = %metric, "Queued background refresh"),
            Err(TrySendError::Full(_)) => {
                metrics::record_refresh_dropped();
                debug!(
                    metric = %metric,
                    limit = self.request_limit,
                    "Refresh queue full, dropping refresh"
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(metric = %metric, "Refresh queue closed");
            }
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// [`MetadataApi`] wrapper caching `get_all_tags`
///
/// Cloning is cheap; clones share the cache.
#[derive(Clone)]
pub struct CachedMetadata {
    inner: Arc<CacheInner>,
}

impl CachedMetadata {
    /// Wrap `backend` using the system clock
    pub fn new(backend: Arc<dyn MetadataApi>, config: CacheConfig) -> Result<Self> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Wrap `backend`, reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn with_clock(
        backend: Arc<dyn MetadataApi>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let to_chrono = |d: Duration| {
            ChronoDuration::from_std(d)
                .map_err(|e| Error::Configuration(format!("duration {:?} out of range: {}", d, e)))
        };

        let (refresh_tx, refresh_rx) = if config.request_limit > 0 {
            let (tx, rx) = mpsc::channel(config.request_limit);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Ok(Self {
            inner: Arc::new(CacheInner {
                backend,
                clock,
                ttl: to_chrono(config.ttl)?,
                freshness: to_chrono(config.freshness)?,
                request_limit: config.request_limit,
                state: Mutex::new(CacheState::default()),
                refresh_tx: Mutex::new(refresh_tx),
                refresh_rx: tokio::sync::Mutex::new(refresh_rx),
                queued: AtomicUsize::new(0),
            }),
        })
    }

    /// Tag sets of `metric`, served from the cache when possible
    pub async fn get_all_tags(
        &self,
        metric: &MetricKey,
        ctx: &Context,
    ) -> std::result::Result<Vec<TagSet>, MetadataError> {
        let _timer = ctx.profiler.as_ref().map(|p| p.record("metadata.get_all_tags"));
        let now = self.inner.clock.now();

        let fetch = {
            let mut state = self.inner.state.lock();
            let cached = state
                .entries
                .get(metric)
                .map(|entry| (self.inner.classify(entry, now), Arc::clone(&entry.tag_sets)));

            match cached {
                Some((Freshness::Fresh, tag_sets)) => {
                    metrics::record_cache_lookup("fresh");
                    return Ok(tag_sets.as_ref().clone());
                }
                Some((Freshness::Stale, tag_sets)) => {
                    metrics::record_cache_lookup("stale");
                    self.inner.enqueue_refresh(metric);
                    return Ok(tag_sets.as_ref().clone());
                }
                Some((Freshness::Expired, _)) | None => {
                    metrics::record_cache_lookup("miss");
                    debug!(metric = %metric, "Tag cache miss");
                    self.inner.fetch(&mut state, metric, ctx)
                }
            }
        };

        fetch.await.map(|tag_sets| tag_sets.as_ref().clone())
    }

    /// Wait for a queued refresh and return the action that performs it
    ///
    /// Blocks until a refresh is queued. Returns `None` once
    /// [`close_refresh_queue`](Self::close_refresh_queue) has been called and
    /// every queued refresh has been handed out. With a zero `request_limit`
    /// there is no queue and this never returns.
    pub async fn get_background_action(&self) -> Option<BackgroundAction> {
        let mut rx = self.inner.refresh_rx.lock().await;
        let metric = match rx.as_mut() {
            Some(rx) => rx.recv().await?,
            None => std::future::pending().await,
        };
        self.inner.queued.fetch_sub(1, Ordering::AcqRel);
        Some(BackgroundAction {
            metric,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Refreshes currently queued
    pub fn current_live_requests(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Stop queuing background refreshes
    ///
    /// Stale reads are still served but no longer queue a refresh. Refreshes
    /// already queued are still handed out by `get_background_action`.
    pub fn close_refresh_queue(&self) {
        if self.inner.refresh_tx.lock().take().is_some() {
            debug!("Closed background refresh queue");
        }
    }

    /// Capacity of the refresh queue
    pub fn maximum_live_requests(&self) -> usize {
        self.inner.request_limit
    }

    /// Snapshot of the cached entry for `metric`
    pub fn cached_entry(&self, metric: &MetricKey) -> Option<CachedTagSetList> {
        self.inner.state.lock().entries.get(metric).cloned()
    }
}

/// One queued background refresh
pub struct BackgroundAction {
    metric: MetricKey,
    inner: Arc<CacheInner>,
}

impl BackgroundAction {
    /// Metric this action refreshes
    pub fn metric(&self) -> &MetricKey {
        &self.metric
    }

    /// Re-fetch the metric's tag sets into the cache
    ///
    /// Joins an in-flight fetch for the same metric rather than issuing a
    /// second backend request.
    pub async fn run(self, ctx: &Context) -> std::result::Result<(), MetadataError> {
        let fetch = {
            let mut state = self.inner.state.lock();
            self.inner.fetch(&mut state, &self.metric, ctx)
        };
        fetch.await.map(|_| ())
    }
}

#[async_trait]
impl MetadataApi for CachedMetadata {
    async fn add_metric(
        &self,
        metric: &TaggedMetric,
        ctx: &Context,
    ) -> std::result::Result<(), MetadataError> {
        self.inner.backend.add_metric(metric, ctx).await
    }

    async fn add_metrics(
        &self,
        metrics: &[TaggedMetric],
        ctx: &Context,
    ) -> std::result::Result<(), MetadataError> {
        self.inner.backend.add_metrics(metrics, ctx).await
    }

    async fn remove_metric(
        &self,
        metric: &TaggedMetric,
        ctx: &Context,
    ) -> std::result::Result<(), MetadataError> {
        self.inner.backend.remove_metric(metric, ctx).await
    }

    async fn get_all_tags(
        &self,
        metric_key: &MetricKey,
        ctx: &Context,
    ) -> std::result::Result<Vec<TagSet>, MetadataError> {
        CachedMetadata::get_all_tags(self, metric_key, ctx).await
    }

    async fn get_all_metrics(
        &self,
        ctx: &Context,
    ) -> std::result::Result<Vec<MetricKey>, MetadataError> {
        self.inner.backend.get_all_metrics(ctx).await
    }

    async fn get_metrics_for_tag(
        &self,
        tag_key: &str,
        tag_value: &str,
        ctx: &Context,
    ) -> std::result::Result<Vec<MetricKey>, MetadataError> {
        self.inner.backend.get_metrics_for_tag(tag_key, tag_value, ctx).await
    }
}
