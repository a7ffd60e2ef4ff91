//! Resolution-aligned time windows
//!
//! A [`Timerange`] is a closed window `[start, end]` of integer milliseconds
//! where both ends are multiples of the resolution. It describes the slots of
//! a uniformly sampled series: slot `i` sits at `start + i * resolution`.
//!
//! An [`Interval`] is the half-open `[start, end)` span of wall-clock time
//! that a set of samples actually covers, which is what the fetch planner and
//! the rollup backend work with.
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::timerange::Timerange;
//!
//! let range = Timerange::new(0, 100, 5).unwrap();
//! assert_eq!(range.slots(), 21);
//!
//! // Misaligned bounds are rejected by `new` but snapped by `new_snapped`
//! assert!(Timerange::new(0, 100, 6).is_err());
//! let snapped = Timerange::new_snapped(1, 100, 6).unwrap();
//! assert_eq!((snapped.start(), snapped.end()), (0, 102));
//! ```

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Half-open interval `[start, end)` in Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    /// Inclusive start in milliseconds
    pub start: i64,
    /// Exclusive end in milliseconds
    pub end: i64,
}

impl Interval {
    /// Create an interval, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidTimerange(format!(
                "interval start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Length of the interval in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// True if the interval covers no time
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// True if `start <= timestamp < end`
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Closed, resolution-aligned window of integer milliseconds
///
/// Invariants (enforced by every constructor):
/// - `resolution > 0`
/// - `start % resolution == 0` and `end % resolution == 0`
/// - `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Timerange {
    start: i64,
    end: i64,
    resolution: i64,
}

impl Timerange {
    /// Create a timerange, validating every invariant
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTimerange` naming the violated invariant.
    pub fn new(start: i64, end: i64, resolution: i64) -> Result<Self> {
        if resolution <= 0 {
            return Err(Error::InvalidTimerange(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        if start % resolution != 0 {
            return Err(Error::InvalidTimerange(format!(
                "start {} is not a multiple of resolution {}",
                start, resolution
            )));
        }
        if end % resolution != 0 {
            return Err(Error::InvalidTimerange(format!(
                "end {} is not a multiple of resolution {}",
                end, resolution
            )));
        }
        if start > end {
            return Err(Error::InvalidTimerange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    /// Create a timerange by snapping both bounds to the nearest multiple of
    /// `resolution` (round half away from zero)
    ///
    /// Fails only if `resolution <= 0` or `start > end`. If snapping pulls the
    /// end before the start, the end is clamped to the start.
    pub fn new_snapped(start: i64, end: i64, resolution: i64) -> Result<Self> {
        if resolution <= 0 {
            return Err(Error::InvalidTimerange(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        if start > end {
            return Err(Error::InvalidTimerange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self::snapped(start, end, resolution))
    }

    /// Snap without validation; `resolution` must already be positive
    fn snapped(start: i64, end: i64, resolution: i64) -> Self {
        let start = snap(start, resolution);
        let end = snap(end, resolution).max(start);
        Self {
            start,
            end,
            resolution,
        }
    }

    /// First slot timestamp in milliseconds
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Last slot timestamp in milliseconds
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Slot width in milliseconds
    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    /// Number of slots: `(end - start) / resolution + 1`
    pub fn slots(&self) -> usize {
        ((self.end - self.start) / self.resolution + 1) as usize
    }

    /// Span between the first and last slot in milliseconds
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Exclusive end of the time actually covered by the samples
    pub fn end_exclusive(&self) -> i64 {
        self.end + self.resolution
    }

    /// True if `timestamp` falls inside the covered interval
    pub fn contains(&self, timestamp: i64) -> bool {
        self.interval().contains(timestamp)
    }

    /// Translate by `delta` milliseconds, then snap
    ///
    /// Only the start is snapped; the end follows at the same duration, so
    /// the slot count never changes.
    pub fn shift(&self, delta: i64) -> Self {
        let start = snap(self.start + delta, self.resolution);
        Self {
            start,
            end: start + self.duration(),
            resolution: self.resolution,
        }
    }

    /// Set `end = start + length`, then snap
    pub fn select_length(&self, length: i64) -> Self {
        Self::snapped(self.start, self.start + length, self.resolution)
    }

    /// Move the start `delta` milliseconds earlier, then snap
    pub fn extend_before(&self, delta: i64) -> Self {
        Self::snapped(self.start - delta, self.end, self.resolution)
    }

    /// Half-open interval `[start, end + resolution)` covered by the samples
    pub fn interval(&self) -> Interval {
        Interval {
            start: self.start,
            end: self.end + self.resolution,
        }
    }

    /// Slot index of `timestamp`, truncating; the caller validates the range
    pub fn index_of_time(&self, timestamp: i64) -> i64 {
        (timestamp - self.start) / self.resolution
    }

    /// Slots strictly after `timestamp`, or `None` if there are none
    pub fn only_after_exclusive(&self, timestamp: i64) -> Option<Self> {
        let next = timestamp.div_euclid(self.resolution) * self.resolution + self.resolution;
        let start = self.start.max(next);
        if start > self.end {
            return None;
        }
        Some(Self {
            start,
            end: self.end,
            resolution: self.resolution,
        })
    }

    /// Slots at or before `timestamp`, or `None` if there are none
    pub fn only_before_inclusive(&self, timestamp: i64) -> Option<Self> {
        let previous = timestamp.div_euclid(self.resolution) * self.resolution;
        let end = self.end.min(previous);
        if end < self.start {
            return None;
        }
        Some(Self {
            start: self.start,
            end,
            resolution: self.resolution,
        })
    }

    /// Smallest timerange at `resolution` whose interval contains this one's
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTimerange` if `resolution <= 0`.
    pub fn resample(&self, resolution: i64) -> Result<Self> {
        if resolution <= 0 {
            return Err(Error::InvalidTimerange(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        let start = self.start.div_euclid(resolution) * resolution;
        let last_covered = self.end_exclusive() - resolution;
        let end = ceil_multiple(last_covered, resolution).max(start);
        Ok(Self {
            start,
            end,
            resolution,
        })
    }
}

impl fmt::Display for Timerange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] every {}ms",
            self.start, self.end, self.resolution
        )
    }
}

/// Round to the nearest multiple of `resolution`, halves away from zero
fn snap(value: i64, resolution: i64) -> i64 {
    if value >= 0 {
        (value + resolution / 2) / resolution * resolution
    } else {
        -((-value + resolution / 2) / resolution * resolution)
    }
}

/// Smallest multiple of `resolution` that is `>= value`
pub(crate) fn ceil_multiple(value: i64, resolution: i64) -> i64 {
    let floor = value.div_euclid(resolution) * resolution;
    if floor == value {
        floor
    } else {
        floor + resolution
    }
}

/// Largest multiple of `resolution` that is `<= value`
pub(crate) fn floor_multiple(value: i64, resolution: i64) -> i64 {
    value.div_euclid(resolution) * resolution
}
