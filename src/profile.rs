//! Per-request timing records
//!
//! A [`Profiler`] travels with one request and collects named durations.
//! [`Profiler::record`] returns a guard that records on drop, so a timed
//! section is just a scope:
//!
//! ```rust
//! use kuba_rollup::profile::Profiler;
//!
//! let profiler = Profiler::new();
//! {
//!     let _timer = profiler.record("rollup.fetch_multiple");
//!     // ... work ...
//! }
//! assert_eq!(profiler.entries().len(), 1);
//! ```

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One completed timed section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Section name, e.g. `rollup.fetch_points`
    pub name: String,
    /// Wall time spent in the section
    pub duration: Duration,
}

/// Collects named durations for one request
#[derive(Debug, Default)]
pub struct Profiler {
    entries: Mutex<Vec<ProfileEntry>>,
}

impl Profiler {
    /// Create an empty profiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `name`; the entry is recorded when the guard drops
    pub fn record(&self, name: impl Into<String>) -> ProfileGuard<'_> {
        ProfileGuard {
            profiler: self,
            name: Some(name.into()),
            started: Instant::now(),
        }
    }

    /// Add a completed entry
    pub fn add(&self, name: impl Into<String>, duration: Duration) {
        self.entries.lock().push(ProfileEntry {
            name: name.into(),
            duration,
        });
    }

    /// Snapshot of all entries in completion order
    pub fn entries(&self) -> Vec<ProfileEntry> {
        self.entries.lock().clone()
    }

    /// Sum of durations recorded under `name`
    pub fn total(&self, name: &str) -> Duration {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.duration)
            .sum()
    }

    /// Number of entries recorded under `name`
    pub fn count(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.name == name).count()
    }
}

/// Records the elapsed time into its profiler when dropped
#[must_use = "the section is timed until the guard is dropped"]
pub struct ProfileGuard<'a> {
    profiler: &'a Profiler,
    name: Option<String>,
    started: Instant,
}

impl Drop for ProfileGuard<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            self.profiler.add(name, self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_on_drop() {
        let profiler = Profiler::new();
        {
            let _a = profiler.record("a");
            let _b = profiler.record("b");
        }
        let names: Vec<String> = profiler.entries().into_iter().map(|e| e.name).collect();
        // Guards drop in reverse declaration order
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_total_sums_by_name() {
        let profiler = Profiler::new();
        profiler.add("x", Duration::from_millis(5));
        profiler.add("x", Duration::from_millis(7));
        profiler.add("y", Duration::from_millis(100));
        assert_eq!(profiler.total("x"), Duration::from_millis(12));
        assert_eq!(profiler.count("x"), 2);
        assert_eq!(profiler.total("missing"), Duration::ZERO);
    }
}
