//! Error types for the rollup fetch engine
//!
//! Every failure the engine can surface is a variant of [`Error`]. Errors
//! are `Clone` because a single failure is often delivered to several
//! waiters: the latched error of a parallel queue, or the result of a
//! coalesced metadata fetch.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Timerange preconditions were violated
    #[error("Invalid timerange: {0}")]
    InvalidTimerange(String),

    /// A serialized tag set could not be parsed
    #[error("Invalid tag set: {0}")]
    InvalidTagSet(String),

    /// A series could not be converted or addressed on the backend
    #[error("Invalid series {metric}: {message}")]
    InvalidSeries {
        /// Metric the failure relates to
        metric: String,
        /// Description of the failure
        message: String,
    },

    /// Every configured tier is coarser than the requested resolution
    #[error("No resolution tier is fine enough for {requested_ms}ms")]
    NoFineEnoughResolution {
        /// Requested resolution in milliseconds
        requested_ms: i64,
    },

    /// The requested range starts before the coarsest usable tier's TTL
    #[error("Requested range starting at {start_ms} has expired from tier {resolution}")]
    ExpiredRange {
        /// Tier whose TTL was exceeded
        resolution: String,
        /// Start of the uncovered range in milliseconds
        start_ms: i64,
    },

    /// No tier satisfies both the lower bound and the fetch plan
    #[error("No viable resolution for {timerange} with lower bound {lower_bound_ms}ms")]
    NoViableResolution {
        /// Display form of the requested timerange
        timerange: String,
        /// Lower bound on the resolution in milliseconds
        lower_bound_ms: i64,
    },

    /// Backend request failed (transport, status, or body decoding)
    #[error("Fetch I/O error for {metric}: {message}")]
    FetchIo {
        /// Graphite name being fetched
        metric: String,
        /// Description of the failure
        message: String,
    },

    /// The shared request timeout elapsed
    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    /// A caller-imposed fetch budget was exceeded
    #[error("Fetch limit exceeded: requested {requested}, limit is {limit}")]
    Limit {
        /// Number of fetches requested so far
        requested: usize,
        /// Configured budget
        limit: usize,
    },

    /// Unimplemented sample method or operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Metadata backend failure, surfaced unchanged
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an `InvalidSeries` error
    pub fn invalid_series(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidSeries {
            metric: metric.into(),
            message: message.into(),
        }
    }

    /// Build a `FetchIo` error
    pub fn fetch_io(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FetchIo {
            metric: metric.into(),
            message: message.into(),
        }
    }

    /// True if this is the unrecoverable fetch timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::FetchTimeout(_))
    }
}

/// Errors reported by a metadata backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The backend has no record of the metric
    #[error("No such metric: {0}")]
    NoSuchMetric(String),

    /// Any other backend failure
    #[error("Metadata backend error: {0}")]
    Backend(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
