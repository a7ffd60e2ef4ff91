//! Tagged metric to Graphite name conversion
//!
//! The rollup store is addressed by dotted paths. A [`GraphiteConverter`]
//! maps each tagged series onto exactly one such path.

use crate::error::{Error, Result};
use crate::types::TaggedMetric;

/// Maps a tagged series to its path in the rollup store
pub trait GraphiteConverter: Send + Sync + 'static {
    /// Backend path for `metric`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSeries` if the series has no representation.
    fn to_graphite_name(&self, metric: &TaggedMetric) -> Result<String>;
}

/// Appends tag values to the metric key in tag-key order
///
/// `cpu.usage{dc=east,host=a}` becomes `cpu.usage.east.a`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DottedTagConverter;

impl GraphiteConverter for DottedTagConverter {
    fn to_graphite_name(&self, metric: &TaggedMetric) -> Result<String> {
        let mut name = metric.metric_key.as_str().to_string();
        for (key, value) in metric.tag_set.iter() {
            if value.is_empty() {
                return Err(Error::invalid_series(
                    metric.to_string(),
                    format!("tag {} has an empty value", key),
                ));
            }
            if value.contains('.') {
                return Err(Error::invalid_series(
                    metric.to_string(),
                    format!("tag {} value {:?} contains '.'", key, value),
                ));
            }
            name.push('.');
            name.push_str(value);
        }
        Ok(name)
    }
}
