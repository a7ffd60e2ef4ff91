//! Configuration management for the rollup fetch engine
//!
//! Configuration is read from TOML, then environment variables override
//! selected fields. Durations are written as strings such as `30s`, `5m`
//! or `1d`.
//!
//! ```toml
//! [rollup]
//! base_url = "http://localhost:19000"
//! tenant_id = "tenant"
//! max_simultaneous_requests = 32
//! timeout = "30s"
//!
//! [[rollup.resolutions]]
//! name = "FULL"
//! resolution = "30s"
//! first_available = "0s"
//! ttl = "1d"
//!
//! [metadata_cache]
//! freshness = "5m"
//! ttl = "1h"
//! request_limit = 1000
//! refresh_workers = 4
//!
//! [monitoring]
//! log_level = "info"
//! structured_logging = false
//! ```

use crate::error::{Error, Result};
use crate::fetch::resolution::{self, duration_str, Resolution};
use crate::fetch::{RollupStorageConfig, Timeout};
use crate::metadata::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Rollup backend and fetch settings
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Metadata cache settings
    #[serde(default)]
    pub metadata_cache: MetadataCacheConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Rollup backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RollupConfig {
    /// Base URL of the rollup HTTP API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Tenant the series belong to
    #[serde(default)]
    pub tenant_id: String,

    /// Concurrency limit of each fetch queue
    #[serde(default = "default_max_simultaneous_requests")]
    pub max_simultaneous_requests: usize,

    /// Default deadline for one fetch
    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,

    /// YAML tier list; takes precedence over `resolutions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolutions_file: Option<PathBuf>,

    /// Inline tier list, finest first
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
}

/// Metadata cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetadataCacheConfig {
    /// Age after which entries are refreshed in the background (`0s` disables)
    #[serde(default = "default_freshness", with = "duration_str")]
    pub freshness: Duration,

    /// Age after which entries are no longer served
    #[serde(default = "default_cache_ttl", with = "duration_str")]
    pub ttl: Duration,

    /// Capacity of the background refresh queue
    #[serde(default = "default_request_limit")]
    pub request_limit: usize,

    /// Number of background refresh workers
    #[serde(default = "default_refresh_workers")]
    pub refresh_workers: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log filter directive (error, warn, info, debug, trace, or an `EnvFilter` string)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:19000".to_string() }
fn default_max_simultaneous_requests() -> usize { 32 }
fn default_timeout() -> Duration { Duration::from_secs(30) }
fn default_freshness() -> Duration { Duration::from_secs(5 * 60) }
fn default_cache_ttl() -> Duration { Duration::from_secs(60 * 60) }
fn default_request_limit() -> usize { 1000 }
fn default_refresh_workers() -> usize { 4 }
fn default_log_level() -> String { "info".to_string() }

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tenant_id: String::new(),
            max_simultaneous_requests: default_max_simultaneous_requests(),
            timeout: default_timeout(),
            resolutions_file: None,
            resolutions: Vec::new(),
        }
    }
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            freshness: default_freshness(),
            ttl: default_cache_ttl(),
            request_limit: default_request_limit(),
            refresh_workers: default_refresh_workers(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl MetadataCacheConfig {
    /// Cache tuning for [`CachedMetadata`](crate::metadata::CachedMetadata)
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            freshness: self.freshness,
            ttl: self.ttl,
            request_limit: self.request_limit,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
            .map_err(|e| Error::Configuration(format!("{} ({})", e, path.display())))
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Reads `KUBA_ROLLUP_BASE_URL`, `KUBA_ROLLUP_TENANT`,
    /// `KUBA_ROLLUP_MAX_REQUESTS` and `RUST_LOG`. Unparsable numbers are
    /// ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("KUBA_ROLLUP_BASE_URL") {
            self.rollup.base_url = base_url;
        }
        if let Ok(tenant) = std::env::var("KUBA_ROLLUP_TENANT") {
            self.rollup.tenant_id = tenant;
        }
        if let Ok(max) = std::env::var("KUBA_ROLLUP_MAX_REQUESTS") {
            match max.parse() {
                Ok(n) => self.rollup.max_simultaneous_requests = n,
                Err(_) => tracing::warn!(value = %max, "Ignoring invalid KUBA_ROLLUP_MAX_REQUESTS"),
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let rollup = &self.rollup;
        if rollup.base_url.trim().is_empty() {
            return Err(Error::Configuration("rollup base_url cannot be empty".to_string()));
        }
        if rollup.tenant_id.trim().is_empty() {
            return Err(Error::Configuration("rollup tenant_id cannot be empty".to_string()));
        }
        if rollup.max_simultaneous_requests == 0 {
            return Err(Error::Configuration(
                "rollup max_simultaneous_requests must be > 0".to_string(),
            ));
        }
        if rollup.timeout.is_zero() {
            return Err(Error::Configuration("rollup timeout must be > 0".to_string()));
        }

        let cache = &self.metadata_cache;
        cache.cache_config().validate()?;
        if cache.request_limit > 0 && cache.refresh_workers == 0 {
            return Err(Error::Configuration(
                "metadata_cache refresh_workers must be > 0 when request_limit is set".to_string(),
            ));
        }

        self.resolutions().map(|_| ())
    }

    /// Configured tiers: the YAML file if given, otherwise the inline list
    pub fn resolutions(&self) -> Result<Vec<Resolution>> {
        match &self.rollup.resolutions_file {
            Some(path) => resolution::load_resolutions(path),
            None => {
                resolution::validate_resolutions(&self.rollup.resolutions)?;
                Ok(self.rollup.resolutions.clone())
            }
        }
    }

    /// Settings for [`RollupStorage`](crate::fetch::RollupStorage)
    pub fn rollup_storage_config(&self) -> Result<RollupStorageConfig> {
        Ok(RollupStorageConfig::new(self.resolutions()?)
            .with_max_simultaneous_requests(self.rollup.max_simultaneous_requests))
    }

    /// Fresh deadline using the configured fetch timeout
    pub fn request_timeout(&self) -> Timeout {
        Timeout::new(self.rollup.timeout)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}
