//! Core data types used throughout the fetch engine
//!
//! # Key Types
//!
//! - **`MetricKey`**: Logical metric name with no variable components
//! - **`TagSet`**: Key-value tags identifying one series of a metric
//! - **`TaggedMetric`**: A metric key plus its tag set; one series
//! - **`SampleMethod`**: How raw rollup points are reduced into a slot
//! - **`MetricPoint`**: One raw sample as returned by the rollup backend
//! - **`Timeseries`** / **`SeriesList`**: Uniformly sampled output
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::types::{MetricKey, TagSet, TaggedMetric};
//!
//! let mut tags = TagSet::new();
//! tags.insert("host", "web-01");
//! tags.insert("dc", "us-east");
//!
//! // Serialization is ordered by key
//! assert_eq!(tags.to_string(), "dc=us-east,host=web-01");
//!
//! let metric = TaggedMetric::new(MetricKey::new("cpu.usage").unwrap(), tags);
//! assert_eq!(metric.metric_key.as_str(), "cpu.usage");
//! ```

use crate::error::{Error, Result};
use crate::timerange::Timerange;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// MetricKey
// =============================================================================

/// Logical metric name, e.g. `cpu.usage`
///
/// Equality is by bytes. The only invariant is that the key is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(String);

impl MetricKey {
    /// Create a metric key, rejecting the empty string
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::invalid_series("", "metric key must not be empty"));
        }
        Ok(Self(key))
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MetricKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// =============================================================================
// TagSet
// =============================================================================

/// Tag set for a series (key-value metadata)
///
/// Keys are unique and iteration is always ordered by key, so two sets with
/// the same pairs serialize identically regardless of insertion order.
///
/// The canonical serialization is `key=value,key=value,...` where `\`, `,`
/// and `=` inside a key or value are escaped with a preceding `\`.
///
/// # Example
///
/// ```rust
/// use kuba_rollup::types::TagSet;
///
/// let mut tags = TagSet::new();
/// tags.insert("path", "a=b");
///
/// let serialized = tags.to_string();
/// assert_eq!(serialized, r"path=a\=b");
/// assert_eq!(serialized.parse::<TagSet>().unwrap(), tags);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag, returning the previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.tags.insert(key.into(), value.into())
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// True if the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if there are no tags
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate tags in key order
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.tags.iter()
    }

    /// Produce a new tag set holding both sets' tags
    ///
    /// Where a key is present in both, the value from `other` wins.
    pub fn merge(&self, other: &TagSet) -> TagSet {
        let mut tags = self.tags.clone();
        for (key, value) in &other.tags {
            tags.insert(key.clone(), value.clone());
        }
        TagSet { tags }
    }

    /// Canonical `key=value,...` serialization, ordered by key
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.tags.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(&mut out, key);
            out.push('=');
            escape_into(&mut out, value);
        }
        out
    }

    /// Parse the canonical serialization produced by [`TagSet::serialize`]
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTagSet` on a dangling or unknown escape, an
    /// unescaped `=` inside a value, a key without `=`, or a duplicate key.
    pub fn parse(input: &str) -> Result<Self> {
        let mut tags = BTreeMap::new();
        if input.is_empty() {
            return Ok(Self { tags });
        }

        let mut key = String::new();
        let mut value = String::new();
        let mut in_value = false;
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = match chars.next() {
                        Some(e @ ('\\' | ',' | '=')) => e,
                        Some(other) => {
                            return Err(Error::InvalidTagSet(format!(
                                "invalid escape sequence '\\{}' in {:?}",
                                other, input
                            )))
                        }
                        None => {
                            return Err(Error::InvalidTagSet(format!(
                                "dangling escape at end of {:?}",
                                input
                            )))
                        }
                    };
                    if in_value {
                        value.push(escaped);
                    } else {
                        key.push(escaped);
                    }
                }
                '=' if !in_value => in_value = true,
                '=' => {
                    return Err(Error::InvalidTagSet(format!(
                        "unescaped '=' in value of tag {:?}",
                        key
                    )))
                }
                ',' if !in_value => {
                    return Err(Error::InvalidTagSet(format!(
                        "tag {:?} has no value",
                        key
                    )))
                }
                ',' => {
                    insert_parsed(&mut tags, std::mem::take(&mut key), std::mem::take(&mut value))?;
                    in_value = false;
                }
                other if in_value => value.push(other),
                other => key.push(other),
            }
        }

        if !in_value {
            return Err(Error::InvalidTagSet(format!("tag {:?} has no value", key)));
        }
        insert_parsed(&mut tags, key, value)?;

        Ok(Self { tags })
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn insert_parsed(tags: &mut BTreeMap<String, String>, key: String, value: String) -> Result<()> {
    if tags.contains_key(&key) {
        return Err(Error::InvalidTagSet(format!("duplicate tag key {:?}", key)));
    }
    tags.insert(key, value);
    Ok(())
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for TagSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

// =============================================================================
// TaggedMetric
// =============================================================================

/// A metric key plus tag set; uniquely identifies one series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedMetric {
    /// Logical metric name
    pub metric_key: MetricKey,
    /// Tags distinguishing this series
    pub tag_set: TagSet,
}

impl TaggedMetric {
    /// Create a tagged metric
    pub fn new(metric_key: MetricKey, tag_set: TagSet) -> Self {
        Self {
            metric_key,
            tag_set,
        }
    }
}

impl fmt::Display for TaggedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.metric_key, self.tag_set)
    }
}

// =============================================================================
// Samples
// =============================================================================

/// How raw points are reduced into one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMethod {
    /// Mean of the rollup averages
    Mean,
    /// Minimum of the rollup minimums
    Min,
    /// Maximum of the rollup maximums
    Max,
}

impl SampleMethod {
    /// Name of the field the rollup backend is asked to select
    pub fn backend_field(&self) -> &'static str {
        match self {
            SampleMethod::Mean => "average",
            SampleMethod::Min => "min",
            SampleMethod::Max => "max",
        }
    }

    /// Pick this method's field from a raw point
    pub fn select(&self, point: &MetricPoint) -> f64 {
        match self {
            SampleMethod::Mean => point.average,
            SampleMethod::Min => point.min,
            SampleMethod::Max => point.max,
        }
    }

    /// Reduce one bucket of values; NaN entries are skipped
    ///
    /// An empty bucket, or one holding only NaN, reduces to NaN.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        let present = values.iter().copied().filter(|v| !v.is_nan());
        match self {
            SampleMethod::Mean => {
                let (sum, count) = present.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            }
            SampleMethod::Min => present.reduce(f64::min).unwrap_or(f64::NAN),
            SampleMethod::Max => present.reduce(f64::max).unwrap_or(f64::NAN),
        }
    }
}

impl fmt::Display for SampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleMethod::Mean => "mean",
            SampleMethod::Min => "min",
            SampleMethod::Max => "max",
        };
        f.write_str(name)
    }
}

impl FromStr for SampleMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" | "average" | "avg" => Ok(SampleMethod::Mean),
            "min" => Ok(SampleMethod::Min),
            "max" => Ok(SampleMethod::Max),
            other => Err(Error::Unsupported(format!("sample method {:?}", other))),
        }
    }
}

fn missing_sample() -> f64 {
    f64::NAN
}

fn nullable_sample<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// One raw sample returned by the rollup backend
///
/// Fields the backend did not select decode as NaN.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    /// Timestamp in Unix milliseconds
    pub timestamp: i64,
    /// Number of raw points rolled into this sample
    #[serde(default)]
    pub num_points: u64,
    /// Rollup average
    #[serde(default = "missing_sample", deserialize_with = "nullable_sample")]
    pub average: f64,
    /// Rollup minimum
    #[serde(default = "missing_sample", deserialize_with = "nullable_sample")]
    pub min: f64,
    /// Rollup maximum
    #[serde(default = "missing_sample", deserialize_with = "nullable_sample")]
    pub max: f64,
    /// Rollup variance, when selected
    #[serde(default)]
    pub variance: Option<f64>,
}

impl MetricPoint {
    /// Point whose average, min and max are all `value`
    pub fn uniform(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            num_points: 1,
            average: value,
            min: value,
            max: value,
            variance: None,
        }
    }
}

// =============================================================================
// Timeseries and SeriesList
// =============================================================================

/// Uniformly sampled values for one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeseries {
    /// One value per slot of the owning timerange; NaN is a missing sample
    pub values: Vec<f64>,
    /// Tags of the series
    pub tag_set: TagSet,
}

impl Timeseries {
    /// Create a series
    pub fn new(values: Vec<f64>, tag_set: TagSet) -> Self {
        Self { values, tag_set }
    }
}

/// A set of series sharing one timerange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesList {
    series: Vec<Timeseries>,
    timerange: Timerange,
}

impl SeriesList {
    /// Create a series list, validating every series' slot count
    pub fn new(series: Vec<Timeseries>, timerange: Timerange) -> Result<Self> {
        let slots = timerange.slots();
        if let Some(bad) = series.iter().find(|s| s.values.len() != slots) {
            return Err(Error::Internal(format!(
                "series [{}] has {} values, timerange {} has {} slots",
                bad.tag_set,
                bad.values.len(),
                timerange,
                slots
            )));
        }
        Ok(Self { series, timerange })
    }

    /// Series in this list
    pub fn series(&self) -> &[Timeseries] {
        &self.series
    }

    /// Consume the list, returning its series
    pub fn into_series(self) -> Vec<Timeseries> {
        self.series
    }

    /// Shared timerange
    pub fn timerange(&self) -> &Timerange {
        &self.timerange
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True if the list holds no series
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Re-bucket every series onto `to`
    pub fn downsample(&self, to: Timerange, method: SampleMethod) -> SeriesList {
        let series = self
            .series
            .iter()
            .map(|s| {
                Timeseries::new(
                    crate::fetch::sampler::downsample(&s.values, &self.timerange, &to, method),
                    s.tag_set.clone(),
                )
            })
            .collect();
        SeriesList {
            series,
            timerange: to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_metric_key_rejects_empty() {
        assert!(MetricKey::new("").is_err());
        assert_eq!(MetricKey::new("a.b").unwrap().as_str(), "a.b");
    }

    #[test]
    fn test_tag_set_serialization_ordered_by_key() {
        let tags = tags(&[("z", "1"), ("a", "2"), ("m", "3")]);
        assert_eq!(tags.serialize(), "a=2,m=3,z=1");
    }

    #[test]
    fn test_tag_set_escape_round_trip() {
        let tags = tags(&[("weird=key=1", "weird,value"), ("weird=key=2", "weird\\value")]);
        let serialized = tags.serialize();
        assert_eq!(
            serialized,
            r"weird\=key\=1=weird\,value,weird\=key\=2=weird\\value"
        );
        assert_eq!(TagSet::parse(&serialized).unwrap(), tags);
    }

    #[test]
    fn test_tag_set_empty_round_trip() {
        assert_eq!(TagSet::parse("").unwrap(), TagSet::new());
        let blank = tags(&[("", "")]);
        assert_eq!(blank.serialize(), "=");
        assert_eq!(TagSet::parse("=").unwrap(), blank);
    }

    #[test]
    fn test_tag_set_parse_rejects_malformed() {
        for bad in [
            "a",
            "a=1,b",
            "a=1,",
            "a=1=2",
            "a=1\\",
            "a=\\x",
            "a=1,a=2",
            ",a=1",
        ] {
            let err = TagSet::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidTagSet(_)),
                "expected InvalidTagSet for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_tag_set_merge_right_wins() {
        let left = tags(&[("a", "1"), ("b", "2")]);
        let right = tags(&[("b", "3"), ("c", "4")]);
        let merged = left.merge(&right);
        assert_eq!(merged, tags(&[("a", "1"), ("b", "3"), ("c", "4")]));
        // Inputs are untouched
        assert_eq!(left.get("b"), Some("2"));
    }

    #[test]
    fn test_sample_method_reduce_skips_nan() {
        let values = [1.0, f64::NAN, 3.0];
        assert_eq!(SampleMethod::Mean.reduce(&values), 2.0);
        assert_eq!(SampleMethod::Min.reduce(&values), 1.0);
        assert_eq!(SampleMethod::Max.reduce(&values), 3.0);
        assert!(SampleMethod::Mean.reduce(&[]).is_nan());
        assert!(SampleMethod::Max.reduce(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_sample_method_parse() {
        assert_eq!("MEAN".parse::<SampleMethod>().unwrap(), SampleMethod::Mean);
        assert_eq!("max".parse::<SampleMethod>().unwrap(), SampleMethod::Max);
        assert!(matches!(
            "median".parse::<SampleMethod>(),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(SampleMethod::Min.backend_field(), "min");
    }

    #[test]
    fn test_metric_point_decodes_partial_selection() {
        let point: MetricPoint =
            serde_json::from_str(r#"{"numPoints": 4, "timestamp": 1000, "max": 9.5}"#).unwrap();
        assert_eq!(point.timestamp, 1000);
        assert_eq!(point.num_points, 4);
        assert_eq!(point.max, 9.5);
        assert!(point.average.is_nan());
        assert_eq!(point.variance, None);

        let point: MetricPoint =
            serde_json::from_str(r#"{"timestamp": 5, "average": null, "extra": true}"#).unwrap();
        assert!(point.average.is_nan());
    }

    #[test]
    fn test_series_list_validates_slot_count() {
        let range = Timerange::new(0, 20, 10).unwrap();
        let ok = Timeseries::new(vec![1.0, 2.0, 3.0], TagSet::new());
        let short = Timeseries::new(vec![1.0], TagSet::new());
        assert!(SeriesList::new(vec![ok.clone()], range).is_ok());
        assert!(SeriesList::new(vec![ok, short], range).is_err());
    }
}
