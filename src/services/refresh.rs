//! Background refresh workers for the metadata cache
//!
//! Stale cache reads queue a refresh; this service drains that queue.
//!
//! ```text
//!   CachedMetadata ──get_background_action()──▶ worker 0 ─┐
//!                  ──get_background_action()──▶ worker 1 ─┼─▶ action.run()
//!                  ──get_background_action()──▶ worker N ─┘
//! ```
//!
//! Workers run until the shutdown broadcast fires, or until the cache's
//! refresh queue is closed and drained. A failed refresh is logged and the
//! stale entry stays in place until it expires.

use crate::metadata::{CachedMetadata, Context};
use crate::services::framework::{Service, ServiceError, ServiceStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counters shared by every worker
#[derive(Debug, Default)]
struct RefreshStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Pool of long-running workers executing queued cache refreshes
pub struct RefreshWorkers {
    cache: CachedMetadata,
    workers: usize,
    status: RwLock<ServiceStatus>,
    stats: Arc<RefreshStats>,
}

impl RefreshWorkers {
    /// Create a pool of `workers` workers draining `cache`
    pub fn new(cache: CachedMetadata, workers: usize) -> Self {
        Self {
            cache,
            workers,
            status: RwLock::new(ServiceStatus::Stopped),
            stats: Arc::new(RefreshStats::default()),
        }
    }

    /// Refreshes that stored a new result
    pub fn refreshes_completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Refreshes whose backend call failed
    pub fn refreshes_failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    async fn run_worker(
        id: usize,
        cache: CachedMetadata,
        stats: Arc<RefreshStats>,
        mut stop: watch::Receiver<bool>,
    ) {
        debug!(worker = id, "Refresh worker started");
        let ctx = Context::default();
        loop {
            let action = tokio::select! {
                biased;
                _ = stop.changed() => break,
                action = cache.get_background_action() => action,
            };
            let Some(action) = action else {
                break;
            };

            let metric = action.metric().clone();
            match action.run(&ctx).await {
                Ok(()) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(worker = id, metric = %metric, "Refreshed cached tag sets");
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(worker = id, metric = %metric, error = %e, "Background refresh failed");
                }
            }
        }
        debug!(worker = id, "Refresh worker stopped");
    }
}

#[async_trait]
impl Service for RefreshWorkers {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        if self.workers == 0 {
            *self.status.write() =
                ServiceStatus::Failed("no refresh workers configured".to_string());
            return Err(ServiceError::InitializationFailed(
                "refresh worker count must be greater than 0".to_string(),
            ));
        }

        *self.status.write() = ServiceStatus::Starting;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(Self::run_worker(
                id,
                self.cache.clone(),
                Arc::clone(&self.stats),
                stop_rx.clone(),
            ));
        }
        *self.status.write() = ServiceStatus::Running;
        info!(
            workers = self.workers,
            queue_limit = self.cache.maximum_live_requests(),
            "Metadata refresh workers running"
        );

        let _ = shutdown.recv().await;
        *self.status.write() = ServiceStatus::Stopping;
        let _ = stop_tx.send(true);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                failure = Some(e.to_string());
            }
        }

        info!(
            completed = self.refreshes_completed(),
            failed = self.refreshes_failed(),
            "Metadata refresh workers stopped"
        );
        match failure {
            Some(message) => {
                *self.status.write() = ServiceStatus::Failed(message.clone());
                Err(ServiceError::RuntimeError(message))
            }
            None => {
                *self.status.write() = ServiceStatus::Stopped;
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "metadata-refresh"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::metadata::{CacheConfig, InMemoryMetadata, MetadataApi};
    use crate::types::{MetricKey, TagSet, TaggedMetric};
    use std::time::Duration;

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let backend = Arc::new(InMemoryMetadata::new());
        let cache = CachedMetadata::new(backend, CacheConfig::default()).unwrap();
        let service = RefreshWorkers::new(cache, 0);
        let (_tx, rx) = broadcast::channel(1);
        assert!(service.start(rx).await.is_err());
        assert!(service.status().is_stopped());
    }

    #[tokio::test]
    async fn test_workers_refresh_stale_entry() {
        let backend = Arc::new(InMemoryMetadata::new());
        let clock = Arc::new(MockClock::at_millis(0));
        let config = CacheConfig {
            freshness: Duration::from_secs(5),
            ttl: Duration::from_secs(10),
            request_limit: 4,
        };
        let cache = CachedMetadata::with_clock(backend.clone(), config, clock.clone()).unwrap();

        let key = MetricKey::new("cpu").unwrap();
        let ctx = Context::default();
        let mut tags = TagSet::new();
        tags.insert("host", "a");
        backend.add_metric(&TaggedMetric::new(key.clone(), tags), &ctx).await.unwrap();
        cache.get_all_tags(&key, &ctx).await.unwrap();

        let service = Arc::new(RefreshWorkers::new(cache.clone(), 2));
        let (tx, rx) = broadcast::channel(1);
        let task = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.start(rx).await })
        };

        clock.advance(Duration::from_secs(6));
        cache.get_all_tags(&key, &ctx).await.unwrap();

        for _ in 0..100 {
            if service.refreshes_completed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(service.refreshes_completed(), 1);
        assert_eq!(service.status(), ServiceStatus::Running);

        let entry = cache.cached_entry(&key).unwrap();
        assert_eq!(entry.expiry.timestamp_millis(), 16_000);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(service.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_worker_exits_when_queue_closed() {
        let backend = Arc::new(InMemoryMetadata::new());
        let cache = CachedMetadata::new(backend, CacheConfig::default()).unwrap();
        let stats = Arc::new(RefreshStats::default());
        let (_stop_tx, stop_rx) = watch::channel(false);

        cache.close_refresh_queue();
        tokio::time::timeout(
            Duration::from_secs(1),
            RefreshWorkers::run_worker(0, cache, Arc::clone(&stats), stop_rx),
        )
        .await
        .unwrap();
        assert_eq!(stats.completed.load(Ordering::Relaxed), 0);
    }
}
