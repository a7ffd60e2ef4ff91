//! Prometheus metrics for the fetch engine
//!
//! Counters and histograms for rollup fetches and the metadata cache,
//! registered once in the default registry.

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    // === Fetch ===

    /// Backend fetch requests by tier and outcome
    pub static ref FETCH_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_fetch_requests_total",
        "Total rollup backend requests",
        &["resolution", "status"]
    ).unwrap();

    /// Backend fetch latency by tier
    pub static ref FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_fetch_duration_seconds",
        "Rollup backend request latency in seconds",
        &["resolution"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    /// Series returned from multi-fetches
    pub static ref SERIES_FETCHED_TOTAL: Counter = register_counter!(
        "rollup_series_fetched_total",
        "Total series returned by multi-fetches"
    ).unwrap();

    // === Metadata cache ===

    /// Cache lookups by outcome (fresh, stale, miss)
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "metadata_cache_lookups_total",
        "Total metadata cache lookups by result",
        &["result"]
    ).unwrap();

    /// Background refreshes dropped because the queue was full
    pub static ref CACHE_REFRESH_DROPPED_TOTAL: Counter = register_counter!(
        "metadata_cache_refresh_dropped_total",
        "Total background refresh requests dropped at capacity"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| Error::Internal(format!("Metrics contain invalid UTF-8: {}", e)))
}

/// Record one backend request
#[inline]
pub fn record_fetch(resolution: &str, status: &str, duration: Duration) {
    FETCH_REQUESTS_TOTAL
        .with_label_values(&[resolution, status])
        .inc();

    FETCH_DURATION
        .with_label_values(&[resolution])
        .observe(duration.as_secs_f64());
}

/// Record series returned by a multi-fetch
#[inline]
pub fn record_series_fetched(count: usize) {
    SERIES_FETCHED_TOTAL.inc_by(count as f64);
}

/// Record a cache lookup outcome
#[inline]
pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a dropped background refresh
#[inline]
pub fn record_refresh_dropped() {
    CACHE_REFRESH_DROPPED_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fetch() {
        record_fetch("FULL", "ok", Duration::from_millis(3));
        let metrics = gather().expect("Failed to gather metrics");
        assert!(metrics.contains("rollup_fetch_requests_total"));
        assert!(metrics.contains("rollup_fetch_duration_seconds"));
    }

    #[test]
    fn test_cache_counters() {
        let before = CACHE_REFRESH_DROPPED_TOTAL.get();
        record_refresh_dropped();
        assert!(CACHE_REFRESH_DROPPED_TOTAL.get() >= before + 1.0);

        record_cache_lookup("miss");
        let metrics = gather().expect("Failed to gather metrics");
        assert!(metrics.contains("metadata_cache_lookups_total"));
    }
}
