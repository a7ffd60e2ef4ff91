//! Multi-resolution fetch planning
//!
//! Splits a requested interval across rollup tiers. The coarsest tier that
//! still holds the data is used first; finer tiers only fill the recent tail
//! that coarser tiers have not rolled up yet.
//!
//! ```text
//!   now - 90d          now - 15d          now - 1d          now
//!       |------60MIN------|------5MIN-------|------FULL------|
//!            ^ request start                       request end ^
//! ```
//!
//! Each tier contributes a whole number of its own samples, so the tiling is
//! exact at tier boundaries and no two tiers cover the same instant.

use crate::error::{Error, Result};
use crate::fetch::resolution::Resolution;
use crate::timerange::{ceil_multiple, floor_multiple, Interval, Timerange};
use crate::types::SampleMethod;
use tracing::debug;

/// One tier's share of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInterval {
    /// Tier to fetch from
    pub resolution: Resolution,
    /// Span this tier covers
    pub interval: Interval,
}

/// Partition `interval` across `resolutions`, coarsest first
///
/// `resolutions` must be ordered finest to coarsest. The returned intervals
/// are ordered oldest first and never overlap.
///
/// # Errors
///
/// Returns `Error::ExpiredRange` if the uncovered start of the request is
/// older than a tier's TTL at the point that tier is considered.
pub fn plan(
    resolutions: &[Resolution],
    now_ms: i64,
    interval: Interval,
) -> Result<Vec<PlannedInterval>> {
    let Some(coarsest) = resolutions.last() else {
        return Ok(Vec::new());
    };
    let coarse_ms = coarsest.resolution_ms();
    let mut here = floor_multiple(interval.start, coarse_ms);
    let end = ceil_multiple(interval.end, coarse_ms);

    let mut planned = Vec::new();
    for tier in resolutions.iter().rev() {
        if here >= end {
            break;
        }
        if here < now_ms.saturating_sub(tier.ttl_ms()) {
            return Err(Error::ExpiredRange {
                resolution: tier.name.clone(),
                start_ms: here,
            });
        }

        let clip_end = end.min(now_ms.saturating_sub(tier.first_available_ms()));
        if clip_end <= here {
            continue;
        }

        let step = tier.resolution_ms();
        let count = (clip_end - here) / step;
        if count > 0 {
            let next = here + count * step;
            debug!(
                resolution = %tier.name,
                start = here,
                end = next,
                samples = count,
                "Planned tier interval"
            );
            planned.push(PlannedInterval {
                resolution: tier.clone(),
                interval: Interval { start: here, end: next },
            });
            here = next;
        }
    }

    Ok(planned)
}

/// Plan using only tiers at least as fine as the timerange's resolution
///
/// # Errors
///
/// Returns `Error::NoFineEnoughResolution` if every tier is coarser than the
/// request, otherwise whatever [`plan`] returns.
pub fn plan_with_only_finer(
    resolutions: &[Resolution],
    now_ms: i64,
    timerange: &Timerange,
) -> Result<Vec<PlannedInterval>> {
    let usable = resolutions
        .iter()
        .position(|tier| tier.resolution_ms() > timerange.resolution())
        .unwrap_or(resolutions.len());
    if usable == 0 {
        return Err(Error::NoFineEnoughResolution {
            requested_ms: timerange.resolution(),
        });
    }
    plan(&resolutions[..usable], now_ms, timerange.interval())
}

/// Pick the finest viable tier for a timerange
///
/// Walks tiers finest first and returns the first one that is at least
/// `lower_bound_ms` wide, at least as wide as the timerange's resolution, and
/// for which planning with tiers up to and including it succeeds.
pub fn choose_resolution<'a>(
    resolutions: &'a [Resolution],
    now_ms: i64,
    timerange: &Timerange,
    lower_bound_ms: i64,
) -> Result<&'a Resolution> {
    for (i, tier) in resolutions.iter().enumerate() {
        let width = tier.resolution_ms();
        if width < lower_bound_ms || width < timerange.resolution() {
            continue;
        }
        match plan(&resolutions[..=i], now_ms, timerange.interval()) {
            Ok(_) => {
                debug!(resolution = %tier.name, timerange = %timerange, "Chose resolution");
                return Ok(tier);
            }
            Err(e) => {
                debug!(resolution = %tier.name, error = %e, "Resolution not viable");
            }
        }
    }
    Err(Error::NoViableResolution {
        timerange: timerange.to_string(),
        lower_bound_ms,
    })
}

/// Everything needed to fetch and align one request's series
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// Tier intervals, oldest first
    pub intervals: Vec<PlannedInterval>,
    /// Timerange the output is aligned to
    pub timerange: Timerange,
    /// Reduction applied per slot
    pub sample_method: SampleMethod,
}

impl FetchPlan {
    /// Plan `planning_range` with tiers no coarser than it, aligning output
    /// to `timerange`
    pub fn build(
        resolutions: &[Resolution],
        now_ms: i64,
        planning_range: &Timerange,
        timerange: Timerange,
        sample_method: SampleMethod,
    ) -> Result<Self> {
        let intervals = plan_with_only_finer(resolutions, now_ms, planning_range)?;
        Ok(Self {
            intervals,
            timerange,
            sample_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;

    fn tier(name: &str, res_ms: u64, first_ms: u64, ttl_ms: u64) -> Resolution {
        Resolution::new(
            name,
            Duration::from_millis(res_ms),
            Duration::from_millis(first_ms),
            Duration::from_millis(ttl_ms),
        )
    }

    fn two_tiers() -> Vec<Resolution> {
        vec![
            tier("FINE", MINUTE as u64, 0, 10 * HOUR as u64),
            tier("COARSE", HOUR as u64, 2 * HOUR as u64, 100 * HOUR as u64),
        ]
    }

    #[test]
    fn test_plan_uses_coarse_tier_for_old_data() {
        let now = 50 * HOUR;
        let planned = plan(
            &two_tiers(),
            now,
            Interval { start: 20 * HOUR, end: 30 * HOUR },
        )
        .unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].resolution.name, "COARSE");
        assert_eq!(planned[0].interval, Interval { start: 20 * HOUR, end: 30 * HOUR });
    }

    #[test]
    fn test_plan_fills_recent_tail_with_fine_tier() {
        let now = 50 * HOUR;
        let planned = plan(
            &two_tiers(),
            now,
            Interval { start: 45 * HOUR, end: 50 * HOUR },
        )
        .unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].resolution.name, "COARSE");
        assert_eq!(planned[0].interval, Interval { start: 45 * HOUR, end: 48 * HOUR });
        assert_eq!(planned[1].resolution.name, "FINE");
        assert_eq!(planned[1].interval, Interval { start: 48 * HOUR, end: 50 * HOUR });
    }

    #[test]
    fn test_plan_snaps_outward_to_coarsest() {
        let now = 50 * HOUR;
        let planned = plan(
            &two_tiers(),
            now,
            Interval { start: 20 * HOUR + 5 * MINUTE, end: 21 * HOUR + 5 * MINUTE },
        )
        .unwrap();
        assert_eq!(planned[0].interval, Interval { start: 20 * HOUR, end: 22 * HOUR });
    }

    #[test]
    fn test_plan_expired_range() {
        let now = 200 * HOUR;
        let err = plan(
            &two_tiers(),
            now,
            Interval { start: 50 * HOUR, end: 60 * HOUR },
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::ExpiredRange {
                resolution: "COARSE".to_string(),
                start_ms: 50 * HOUR
            }
        );
    }

    #[test]
    fn test_plan_empty_interval_is_empty_plan() {
        let planned = plan(
            &two_tiers(),
            50 * HOUR,
            Interval { start: 10 * HOUR, end: 10 * HOUR },
        )
        .unwrap();
        assert!(planned.is_empty());
        assert!(plan(&[], 0, Interval { start: 0, end: 10 }).unwrap().is_empty());
    }

    #[test]
    fn test_plan_with_only_finer_truncates_tiers() {
        let now = 50 * HOUR;
        let range = Timerange::new(45 * HOUR, 49 * HOUR, MINUTE).unwrap();
        let planned = plan_with_only_finer(&two_tiers(), now, &range).unwrap();
        assert!(planned.iter().all(|p| p.resolution.name == "FINE"));
    }

    #[test]
    fn test_plan_with_only_finer_rejects_too_fine_request() {
        let range = Timerange::new(0, 10_000, 1_000).unwrap();
        let err = plan_with_only_finer(&two_tiers(), 50 * HOUR, &range).unwrap_err();
        assert_eq!(err, Error::NoFineEnoughResolution { requested_ms: 1_000 });
    }

    #[test]
    fn test_choose_resolution_respects_lower_bound() {
        let now = 50 * HOUR;
        let tiers = two_tiers();
        let range = Timerange::new(45 * HOUR, 49 * HOUR, MINUTE).unwrap();
        let chosen = choose_resolution(&tiers, now, &range, 0).unwrap();
        assert_eq!(chosen.name, "FINE");

        let chosen = choose_resolution(&tiers, now, &range, 30 * MINUTE).unwrap();
        assert_eq!(chosen.name, "COARSE");
    }

    #[test]
    fn test_choose_resolution_skips_expired_tiers() {
        let now = 50 * HOUR;
        let tiers = two_tiers();
        // Older than FINE's ttl, within COARSE's
        let range = Timerange::new(20 * HOUR, 30 * HOUR, MINUTE).unwrap();
        let chosen = choose_resolution(&tiers, now, &range, 0).unwrap();
        assert_eq!(chosen.name, "COARSE");

        let ancient = Timerange::new(0, HOUR, MINUTE).unwrap();
        let err = choose_resolution(&tiers, 500 * HOUR, &ancient, 0).unwrap_err();
        assert!(matches!(err, Error::NoViableResolution { .. }));
    }
}
