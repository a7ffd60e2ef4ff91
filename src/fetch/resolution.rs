//! Rollup resolution tiers
//!
//! A tier is one granularity offered by the rollup backend. Each tier has a
//! sample width, an age before which its samples are not yet available, and
//! a time-to-live after which they are discarded. Tiers are configured as a
//! YAML list ordered from finest to coarsest:
//!
//! ```yaml
//! - name: FULL
//!   resolution: 30s
//!   first_available: 0s
//!   ttl: 1d
//! - name: 5MIN
//!   resolution: 5m
//!   first_available: 1d
//!   ttl: 30d
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// One rollup tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Tier name as the backend knows it, e.g. `FULL` or `5MIN`
    pub name: String,
    /// Width of one sample
    #[serde(with = "duration_str")]
    pub resolution: Duration,
    /// Age at which samples first become available in this tier
    #[serde(with = "duration_str", default)]
    pub first_available: Duration,
    /// Age after which samples are dropped from this tier
    #[serde(with = "duration_str", alias = "time_to_live")]
    pub ttl: Duration,
}

impl Resolution {
    /// Create a tier
    pub fn new(
        name: impl Into<String>,
        resolution: Duration,
        first_available: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            resolution,
            first_available,
            ttl,
        }
    }

    /// Sample width in milliseconds
    pub fn resolution_ms(&self) -> i64 {
        duration_ms(self.resolution)
    }

    /// First-available age in milliseconds
    pub fn first_available_ms(&self) -> i64 {
        duration_ms(self.first_available)
    }

    /// Time-to-live in milliseconds
    pub fn ttl_ms(&self) -> i64 {
        duration_ms(self.ttl)
    }

    /// Check this tier's own invariants
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Configuration("resolution name must not be empty".into()));
        }
        if self.resolution_ms() <= 0 {
            return Err(Error::Configuration(format!(
                "resolution {} must have a positive width",
                self.name
            )));
        }
        if self.ttl_ms() <= 0 {
            return Err(Error::Configuration(format!(
                "resolution {} must have a positive ttl",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Validate a tier list: non-empty, every tier valid, finest first
pub fn validate_resolutions(resolutions: &[Resolution]) -> Result<()> {
    if resolutions.is_empty() {
        return Err(Error::Configuration(
            "at least one resolution must be configured".into(),
        ));
    }
    for tier in resolutions {
        tier.validate()?;
    }
    for pair in resolutions.windows(2) {
        if pair[1].resolution < pair[0].resolution {
            return Err(Error::Configuration(format!(
                "resolutions must be ordered finest first: {} ({:?}) comes after {} ({:?})",
                pair[1].name, pair[1].resolution, pair[0].name, pair[0].resolution
            )));
        }
    }
    Ok(())
}

/// Parse a YAML tier list and validate it
pub fn parse_resolutions(yaml: &str) -> Result<Vec<Resolution>> {
    let resolutions: Vec<Resolution> = serde_yaml::from_str(yaml)
        .map_err(|e| Error::Configuration(format!("Failed to parse resolutions: {}", e)))?;
    validate_resolutions(&resolutions)?;
    Ok(resolutions)
}

/// Load and validate a YAML tier list from a file
pub fn load_resolutions<P: AsRef<Path>>(path: P) -> Result<Vec<Resolution>> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::Configuration(format!(
            "Failed to read resolutions file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    parse_resolutions(&contents)
}

// =============================================================================
// Duration strings
// =============================================================================

const UNITS: [(&str, u64); 6] = [
    ("w", 7 * 86_400_000),
    ("d", 86_400_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
    ("ms", 1),
];

/// Parse a duration string such as `30s`, `5m` or `1.5h`
///
/// Units are `ms`, `s`, `m`, `h`, `d` and `w`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Configuration("Empty duration string".into()));
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    if num_end == 0 {
        return Err(Error::Configuration(format!(
            "Duration must start with a number: {:?}",
            s
        )));
    }

    let value: f64 = s[..num_end]
        .parse()
        .map_err(|_| Error::Configuration(format!("Invalid duration number: {:?}", s)))?;
    let unit = s[num_end..].trim();

    let millis_per_unit = if unit.is_empty() {
        1_000
    } else {
        UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, ms)| *ms)
            .ok_or_else(|| Error::Configuration(format!("Unknown duration unit: {}", unit)))?
    };

    Ok(Duration::from_millis(
        (value * millis_per_unit as f64).round() as u64,
    ))
}

/// Render a duration in the largest unit that divides it exactly
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    for (name, per) in UNITS {
        if millis % per == 0 {
            return format!("{}{}", millis / per, name);
        }
    }
    format!("{}ms", millis)
}

/// Serde adapter for human-readable duration strings
pub mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    /// Write as a duration string
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    /// Read a duration string or a bare number of seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => parse_duration(&text).map_err(de::Error::custom),
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}
