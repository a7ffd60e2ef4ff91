//! Rollup-backed [`TimeseriesStorage`]
//!
//! A multi-fetch is planned once and then fanned out twice: one task per
//! series on an outer [`ParallelQueue`], and inside each of those one task
//! per planned tier interval on an inner queue. Both queues share the
//! request's [`Timeout`]. Each series' points are aligned by the sampler and
//! written into a slot at the series' input index, so output order matches
//! input order regardless of completion order.
//!
//! Any error (conversion, transport, decoding, timeout) fails the whole
//! request; partial results are never returned.

use crate::backend::converter::GraphiteConverter;
use crate::backend::rollup::{RollupClient, RollupQuery};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fetch::parallel::{ParallelQueue, Timeout};
use crate::fetch::planner::{self, FetchPlan};
use crate::fetch::resolution::{validate_resolutions, Resolution};
use crate::fetch::{sampler, FetchMultipleRequest, FetchRequest, TimeseriesStorage};
use crate::metrics;
use crate::profile::Profiler;
use crate::timerange::Timerange;
use crate::types::{MetricPoint, SeriesList, Timeseries};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for [`RollupStorage`]
#[derive(Debug, Clone)]
pub struct RollupStorageConfig {
    /// Tiers ordered finest to coarsest
    pub resolutions: Vec<Resolution>,
    /// Concurrency limit of each fetch queue
    pub max_simultaneous_requests: usize,
}

impl RollupStorageConfig {
    /// Configuration for `resolutions` with the default concurrency
    pub fn new(resolutions: Vec<Resolution>) -> Self {
        Self {
            resolutions,
            max_simultaneous_requests: 32,
        }
    }

    /// Set the concurrency limit
    pub fn with_max_simultaneous_requests(mut self, max: usize) -> Self {
        self.max_simultaneous_requests = max;
        self
    }
}

/// Fetches tagged series from the rollup store
pub struct RollupStorage {
    config: RollupStorageConfig,
    client: Arc<dyn RollupClient>,
    converter: Arc<dyn GraphiteConverter>,
    clock: Arc<dyn Clock>,
}

impl RollupStorage {
    /// Create a storage over `client`, naming series with `converter`
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the tier list is empty or unordered,
    /// or the concurrency limit is zero.
    pub fn new(
        config: RollupStorageConfig,
        client: Arc<dyn RollupClient>,
        converter: Arc<dyn GraphiteConverter>,
    ) -> Result<Self> {
        validate_resolutions(&config.resolutions)?;
        if config.max_simultaneous_requests == 0 {
            return Err(Error::Configuration(
                "max_simultaneous_requests must be greater than 0".to_string(),
            ));
        }

        info!(
            tiers = config.resolutions.len(),
            max_simultaneous_requests = config.max_simultaneous_requests,
            "Creating rollup storage"
        );

        Ok(Self {
            config,
            client,
            converter,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the wall clock used for planning
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured tiers, finest first
    pub fn resolutions(&self) -> &[Resolution] {
        &self.config.resolutions
    }

    /// Range to plan for: one extra step forward unless that reaches past now
    fn planning_range(timerange: &Timerange, now_ms: i64) -> Timerange {
        if timerange.end() + timerange.resolution() <= now_ms {
            timerange.select_length(timerange.duration() + timerange.resolution())
        } else {
            *timerange
        }
    }
}

/// Fetch and concatenate every planned interval of one series
async fn fetch_series_points(
    client: Arc<dyn RollupClient>,
    graphite_name: String,
    plan: Arc<FetchPlan>,
    timeout: Timeout,
    limit: usize,
    profiler: Option<Arc<Profiler>>,
) -> Result<Vec<MetricPoint>> {
    let queue: ParallelQueue<Vec<MetricPoint>> = ParallelQueue::new(limit, timeout);

    for planned in &plan.intervals {
        let q = queue.clone();
        let client = Arc::clone(&client);
        let profiler = profiler.clone();
        let query = RollupQuery {
            graphite_name: graphite_name.clone(),
            resolution: planned.resolution.name.clone(),
            interval: planned.interval,
            sample_method: plan.sample_method,
        };

        queue.submit(move || async move {
            let points = {
                let _timer = profiler.as_ref().map(|p| p.record("rollup.fetch_points"));
                client.fetch_points(&query, &q.timeout()).await?
            };
            q.state().lock().extend(points);
            Ok(())
        });
    }

    queue.wait().await?;
    Ok(queue.take_state())
}

#[async_trait]
impl TimeseriesStorage for RollupStorage {
    async fn fetch_single_timeseries(&self, request: FetchRequest) -> Result<Timeseries> {
        self.fetch_multiple_timeseries(request.into_multiple())
            .await?
            .into_series()
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("single fetch returned no series".to_string()))
    }

    async fn fetch_multiple_timeseries(&self, request: FetchMultipleRequest) -> Result<SeriesList> {
        let _timer = request
            .profiler
            .as_ref()
            .map(|p| p.record("rollup.fetch_multiple"));
        let started = Instant::now();

        if let Some(limit) = &request.fetch_limit {
            limit.consume(request.metrics.len())?;
        }

        let timerange = request.timerange;
        let now_ms = self.clock.now_millis();
        let planning_range = Self::planning_range(&timerange, now_ms);
        let plan = Arc::new(FetchPlan::build(
            &self.config.resolutions,
            now_ms,
            &planning_range,
            timerange,
            request.sample_method,
        )?);

        let series_count = request.metrics.len();
        debug!(
            series = series_count,
            intervals = plan.intervals.len(),
            timerange = %timerange,
            sample_method = %request.sample_method,
            "Starting multi-fetch"
        );

        let limit = self.config.max_simultaneous_requests;
        let queue: ParallelQueue<Vec<Option<Timeseries>>> =
            ParallelQueue::with_state(limit, request.timeout, vec![None; series_count]);

        for (index, metric) in request.metrics.into_iter().enumerate() {
            let q = queue.clone();
            let client = Arc::clone(&self.client);
            let converter = Arc::clone(&self.converter);
            let plan = Arc::clone(&plan);
            let profiler = request.profiler.clone();

            queue.submit(move || async move {
                let graphite_name = converter.to_graphite_name(&metric)?;
                let points = fetch_series_points(
                    client,
                    graphite_name,
                    Arc::clone(&plan),
                    q.timeout(),
                    limit,
                    profiler,
                )
                .await?;
                let values = sampler::sample_points(&points, &plan.timerange, plan.sample_method);
                q.state().lock()[index] = Some(Timeseries::new(values, metric.tag_set));
                Ok(())
            });
        }

        if let Err(e) = queue.wait().await {
            warn!(series = series_count, error = %e, "Multi-fetch failed");
            return Err(e);
        }

        let series = queue
            .take_state()
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| Error::Internal(format!("no result for series {}", i)))
            })
            .collect::<Result<Vec<_>>>()?;

        metrics::record_series_fetched(series.len());
        debug!(
            series = series.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Finished multi-fetch"
        );
        SeriesList::new(series, timerange)
    }

    fn choose_resolution(
        &self,
        timerange: &Timerange,
        lower_bound: Duration,
    ) -> Result<Resolution> {
        let lower_bound_ms = i64::try_from(lower_bound.as_millis()).unwrap_or(i64::MAX);
        planner::choose_resolution(
            &self.config.resolutions,
            self.clock.now_millis(),
            timerange,
            lower_bound_ms,
        )
        .cloned()
    }

    async fn check_healthy(&self) -> Result<()> {
        self.client.check_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::converter::DottedTagConverter;
    use crate::clock::MockClock;
    use crate::types::{MetricKey, MetricPoint, SampleMethod, TagSet, TaggedMetric};
    use parking_lot::Mutex;

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;

    /// Serves one point per tier sample, valued by the series' `host` tag
    #[derive(Default)]
    struct SyntheticClient {
        queries: Mutex<Vec<RollupQuery>>,
    }

    #[async_trait]
    impl RollupClient for SyntheticClient {
        async fn fetch_points(
            &self,
            query: &RollupQuery,
            _timeout: &Timeout,
        ) -> Result<Vec<MetricPoint>> {
            self.queries.lock().push(query.clone());
            if query.graphite_name.ends_with("broken") {
                return Err(Error::fetch_io(&query.graphite_name, "503"));
            }
            let value: f64 = query
                .graphite_name
                .rsplit('.')
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
            let step = if query.resolution == "FINE" { MINUTE } else { HOUR };
            Ok((query.interval.start..query.interval.end)
                .step_by(step as usize)
                .map(|t| MetricPoint::uniform(t, value))
                .collect())
        }

        async fn check_healthy(&self) -> Result<()> {
            Ok(())
        }
    }

    fn tiers() -> Vec<Resolution> {
        vec![
            Resolution::new(
                "FINE",
                Duration::from_millis(MINUTE as u64),
                Duration::ZERO,
                Duration::from_millis(10 * HOUR as u64),
            ),
            Resolution::new(
                "COARSE",
                Duration::from_millis(HOUR as u64),
                Duration::from_millis(2 * HOUR as u64),
                Duration::from_millis(100 * HOUR as u64),
            ),
        ]
    }

    fn storage(client: Arc<SyntheticClient>, now_ms: i64) -> RollupStorage {
        RollupStorage::new(
            RollupStorageConfig::new(tiers()).with_max_simultaneous_requests(4),
            client,
            Arc::new(DottedTagConverter),
        )
        .unwrap()
        .with_clock(Arc::new(MockClock::at_millis(now_ms)))
    }

    fn metric(host: &str) -> TaggedMetric {
        let mut tags = TagSet::new();
        tags.insert("host", host);
        TaggedMetric::new(MetricKey::new("cpu").unwrap(), tags)
    }

    fn timeout() -> Timeout {
        Timeout::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(46 * HOUR, 47 * HOUR, HOUR).unwrap();

        let metrics: Vec<_> = (1..=6).map(|i| metric(&i.to_string())).collect();
        let request = FetchMultipleRequest::new(metrics, range, SampleMethod::Mean, timeout());
        let list = storage.fetch_multiple_timeseries(request).await.unwrap();

        assert_eq!(list.len(), 6);
        for (i, series) in list.series().iter().enumerate() {
            assert_eq!(series.tag_set.get("host"), Some((i + 1).to_string().as_str()));
            assert_eq!(series.values, vec![(i + 1) as f64; 2]);
        }
    }

    #[tokio::test]
    async fn test_planning_extends_one_step_when_in_past() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(20 * HOUR, 22 * HOUR, HOUR).unwrap();

        storage
            .fetch_multiple_timeseries(FetchMultipleRequest::new(
                vec![metric("1")],
                range,
                SampleMethod::Max,
                timeout(),
            ))
            .await
            .unwrap();

        let queries = client.queries.lock();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].resolution, "COARSE");
        assert_eq!(queries[0].interval.start, 20 * HOUR);
        assert_eq!(queries[0].interval.end, 24 * HOUR);
    }

    #[tokio::test]
    async fn test_conversion_failure_is_invalid_series() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(46 * HOUR, 47 * HOUR, HOUR).unwrap();

        let err = storage
            .fetch_multiple_timeseries(FetchMultipleRequest::new(
                vec![metric("1"), metric("bad.host")],
                range,
                SampleMethod::Mean,
                timeout(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSeries { .. }));
    }

    #[tokio::test]
    async fn test_backend_error_fails_whole_request() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(46 * HOUR, 47 * HOUR, HOUR).unwrap();

        let err = storage
            .fetch_multiple_timeseries(FetchMultipleRequest::new(
                vec![metric("1"), metric("broken")],
                range,
                SampleMethod::Mean,
                timeout(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchIo { .. }));
    }

    #[tokio::test]
    async fn test_fetch_limit_checked_before_io() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(46 * HOUR, 47 * HOUR, HOUR).unwrap();
        let request = FetchMultipleRequest::new(
            vec![metric("1"), metric("2"), metric("3")],
            range,
            SampleMethod::Mean,
            timeout(),
        )
        .with_fetch_limit(crate::fetch::FetchLimit::new(2));

        let err = storage.fetch_multiple_timeseries(request).await.unwrap_err();
        assert_eq!(err, Error::Limit { requested: 3, limit: 2 });
        assert!(client.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_single_fetch_and_profiling() {
        let client = Arc::new(SyntheticClient::default());
        let storage = storage(Arc::clone(&client), 50 * HOUR);
        let range = Timerange::new(46 * HOUR, 49 * HOUR, HOUR).unwrap();
        let profiler = Arc::new(Profiler::new());

        let mut request = FetchRequest::new(metric("7"), range, SampleMethod::Min, timeout());
        request.profiler = Some(Arc::clone(&profiler));
        let series = storage.fetch_single_timeseries(request).await.unwrap();

        assert_eq!(series.values.len(), 4);
        assert_eq!(series.values[0], 7.0);
        assert_eq!(profiler.count("rollup.fetch_multiple"), 1);
        assert!(profiler.count("rollup.fetch_points") >= 1);
    }

    #[test]
    fn test_choose_resolution_uses_clock() {
        let storage = storage(Arc::new(SyntheticClient::default()), 50 * HOUR);
        let range = Timerange::new(45 * HOUR, 49 * HOUR, MINUTE).unwrap();
        let tier = storage.choose_resolution(&range, Duration::ZERO).unwrap();
        assert_eq!(tier.name, "FINE");
        let tier = storage
            .choose_resolution(&range, Duration::from_secs(1800))
            .unwrap();
        assert_eq!(tier.name, "COARSE");
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let client: Arc<dyn RollupClient> = Arc::new(SyntheticClient::default());
        let converter: Arc<dyn GraphiteConverter> = Arc::new(DottedTagConverter);
        assert!(RollupStorage::new(
            RollupStorageConfig::new(Vec::new()),
            Arc::clone(&client),
            Arc::clone(&converter)
        )
        .is_err());
        assert!(RollupStorage::new(
            RollupStorageConfig::new(tiers()).with_max_simultaneous_requests(0),
            client,
            converter
        )
        .is_err());
    }
}
