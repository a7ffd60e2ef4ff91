//! Rollup backend HTTP client
//!
//! Samples are fetched per series, per tier, per interval:
//!
//! ```text
//! GET {base}/v2.0/{tenant}/views/{graphite_name}
//!     ?from={start}&to={end - 1}&resolution={tier}&select=numPoints,{field}
//! ```
//!
//! Every request races the fetch's shared [`Timeout`]; when it fires the
//! in-flight request future is dropped, which cancels the connection.

use crate::error::{Error, Result};
use crate::fetch::parallel::Timeout;
use crate::metrics;
use crate::timerange::Interval;
use crate::types::{MetricPoint, SampleMethod};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// One backend query: a series path, a tier and an interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupQuery {
    /// Dotted Graphite path of the series
    pub graphite_name: String,
    /// Tier name as the backend knows it
    pub resolution: String,
    /// Half-open interval to fetch
    pub interval: Interval,
    /// Determines which rollup field is selected
    pub sample_method: SampleMethod,
}

/// Source of raw rollup points
#[async_trait]
pub trait RollupClient: Send + Sync + 'static {
    /// Fetch the raw points for one query
    async fn fetch_points(
        &self,
        query: &RollupQuery,
        timeout: &Timeout,
    ) -> Result<Vec<MetricPoint>>;

    /// Probe backend health
    async fn check_healthy(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ViewsResponse {
    #[serde(default)]
    values: Vec<MetricPoint>,
}

/// [`RollupClient`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpRollupClient {
    client: Client,
    base_url: Url,
    tenant_id: String,
}

impl HttpRollupClient {
    /// Create a client for `base_url` and `tenant_id`
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the URL does not parse or cannot
    /// carry path segments.
    pub fn new(base_url: &str, tenant_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(client, base_url, tenant_id)
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(
        client: Client,
        base_url: &str,
        tenant_id: impl Into<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            Error::Configuration(format!("Invalid rollup base URL {:?}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "Rollup base URL {} cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            tenant_id: tenant_id.into(),
        })
    }

    fn url_with_path(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!(
                    "Rollup base URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// URL for one query; path components are percent-encoded
    pub fn query_url(&self, query: &RollupQuery) -> Result<Url> {
        let mut url = self
            .url_with_path(&["v2.0", &self.tenant_id, "views", &query.graphite_name])
            .map_err(|e| Error::invalid_series(&query.graphite_name, e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("from", &query.interval.start.to_string())
            .append_pair("to", &(query.interval.end - 1).to_string())
            .append_pair("resolution", &query.resolution)
            .append_pair(
                "select",
                &format!("numPoints,{}", query.sample_method.backend_field()),
            );
        Ok(url)
    }

    async fn get_points(&self, url: Url, graphite_name: &str) -> Result<Vec<MetricPoint>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch_io(graphite_name, format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::fetch_io(graphite_name, format!("reading body of {} failed: {}", url, e))
        })?;

        if !status.is_success() {
            return Err(Error::fetch_io(
                graphite_name,
                format!("GET {} returned {}: {}", url, status, body),
            ));
        }

        let parsed: ViewsResponse = serde_json::from_str(&body).map_err(|e| {
            Error::fetch_io(
                graphite_name,
                format!("invalid JSON from {}: {}; body: {}", url, e, body),
            )
        })?;
        Ok(parsed.values)
    }
}

#[async_trait]
impl RollupClient for HttpRollupClient {
    async fn fetch_points(
        &self,
        query: &RollupQuery,
        timeout: &Timeout,
    ) -> Result<Vec<MetricPoint>> {
        let url = self.query_url(query)?;
        let started = Instant::now();
        debug!(
            metric = %query.graphite_name,
            resolution = %query.resolution,
            from = query.interval.start,
            to = query.interval.end,
            "Fetching rollup points"
        );

        let result = tokio::select! {
            biased;
            _ = timeout.expired() => Err(timeout.error()),
            r = self.get_points(url, &query.graphite_name) => r,
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "error",
        };
        metrics::record_fetch(&query.resolution, status, started.elapsed());

        match &result {
            Ok(points) => debug!(
                metric = %query.graphite_name,
                resolution = %query.resolution,
                points = points.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Fetched rollup points"
            ),
            Err(e) => warn!(
                metric = %query.graphite_name,
                resolution = %query.resolution,
                error = %e,
                "Rollup fetch failed"
            ),
        }
        result
    }

    async fn check_healthy(&self) -> Result<()> {
        let url = self.url_with_path(&["v2.0"])?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch_io("health", format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.map_err(|e| {
            Error::fetch_io(
                "health",
                format!("GET {} returned {}; reading body failed: {}", url, status, e),
            )
        })?;
        Err(Error::fetch_io(
            "health",
            format!("GET {} returned {}: {}", url, status, body),
        ))
    }
}
