//! Kuba Rollup - tagged time-series fetch engine over a hierarchical rollup store
//!
//! The rollup store keeps every series at several resolutions ("tiers"),
//! each retained for a different span of time. This library turns a request
//! for tagged series over a timerange into backend requests against the
//! right tiers, runs them in parallel under one deadline, and aligns the
//! returned points to the requested resolution.
//!
//! ```text
//!   TaggedMetric ──GraphiteConverter──▶ graphite name
//!   Timerange ──planner──▶ [(tier, interval), ...] ──RollupClient──▶ points
//!   points ──sampler──▶ Timeseries ──▶ SeriesList
//! ```
//!
//! Tag sets for a metric key come from a [`metadata::MetadataApi`], usually
//! fronted by the staleness-aware [`metadata::CachedMetadata`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod timerange;
pub mod types;

/// Multi-resolution fetch planning and execution
pub mod fetch;

/// Rollup backend client and series naming
pub mod backend;

/// Tag index interface and metadata cache
pub mod metadata;

/// Background services such as cache refresh workers
pub mod services;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber initialization
pub mod logging;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Per-request timing records
pub mod profile;

// Re-export main types
pub use error::{Error, MetadataError, Result};
pub use fetch::{
    FetchLimit, FetchMultipleRequest, FetchRequest, Resolution, RollupStorage, RollupStorageConfig,
    TimeseriesStorage, Timeout,
};
pub use timerange::{Interval, Timerange};
pub use types::{MetricKey, SampleMethod, SeriesList, TagSet, TaggedMetric, Timeseries};
