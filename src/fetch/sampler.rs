//! Point-to-slot alignment
//!
//! Turns an unordered collection of raw rollup points into exactly
//! `timerange.slots()` values. A point lands in slot
//! `(timestamp - start) / resolution`; points outside the timerange's
//! interval are dropped. Each slot is then reduced with the sample method.
//! The output depends only on which values land in which slot, so the order
//! of the input does not matter.

use crate::timerange::Timerange;
use crate::types::{MetricPoint, SampleMethod};

/// Align raw points to the slots of `timerange`
pub fn sample_points(
    points: &[MetricPoint],
    timerange: &Timerange,
    method: SampleMethod,
) -> Vec<f64> {
    bucket(
        points.iter().map(|p| (p.timestamp, method.select(p))),
        timerange,
        method,
    )
}

/// Re-bucket values sampled on `from` onto the slots of `to`
///
/// Each value is treated as a point at its slot's timestamp.
pub fn downsample(
    values: &[f64],
    from: &Timerange,
    to: &Timerange,
    method: SampleMethod,
) -> Vec<f64> {
    bucket(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (from.start() + i as i64 * from.resolution(), *v)),
        to,
        method,
    )
}

fn bucket<I>(samples: I, timerange: &Timerange, method: SampleMethod) -> Vec<f64>
where
    I: Iterator<Item = (i64, f64)>,
{
    let slots = timerange.slots();
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); slots];

    for (timestamp, value) in samples {
        if timestamp < timerange.start() {
            continue;
        }
        let index = timerange.index_of_time(timestamp);
        if let Some(bucket) = usize::try_from(index).ok().and_then(|i| buckets.get_mut(i)) {
            bucket.push(value);
        }
    }

    buckets.iter().map(|b| method.reduce(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: i64, value: f64) -> MetricPoint {
        MetricPoint::uniform(timestamp, value)
    }

    #[test]
    fn test_sample_points_buckets_by_slot() {
        let range = Timerange::new(0, 30, 10).unwrap();
        let points = vec![point(0, 1.0), point(5, 3.0), point(20, 7.0), point(39, 9.0)];
        let values = sample_points(&points, &range, SampleMethod::Mean);
        assert_eq!(values[0], 2.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 7.0);
        assert_eq!(values[3], 9.0);
    }

    #[test]
    fn test_sample_points_drops_out_of_range() {
        let range = Timerange::new(100, 120, 10).unwrap();
        let points = vec![point(99, 1.0), point(130, 2.0), point(-50, 3.0), point(110, 4.0)];
        let values = sample_points(&points, &range, SampleMethod::Max);
        assert_eq!(values.len(), 3);
        assert!(values[0].is_nan());
        assert_eq!(values[1], 4.0);
        assert!(values[2].is_nan());
    }

    #[test]
    fn test_sample_points_selects_method_field() {
        let range = Timerange::new(0, 0, 10).unwrap();
        let p = MetricPoint {
            timestamp: 0,
            num_points: 3,
            average: 5.0,
            min: 1.0,
            max: 9.0,
            variance: None,
        };
        assert_eq!(sample_points(&[p], &range, SampleMethod::Mean), vec![5.0]);
        assert_eq!(sample_points(&[p], &range, SampleMethod::Min), vec![1.0]);
        assert_eq!(sample_points(&[p], &range, SampleMethod::Max), vec![9.0]);
    }

    #[test]
    fn test_sample_points_order_insensitive() {
        let range = Timerange::new(0, 20, 10).unwrap();
        let mut points = vec![point(0, 1.0), point(3, 2.0), point(11, 5.0), point(15, 6.0)];
        let forward = sample_points(&points, &range, SampleMethod::Mean);
        points.reverse();
        assert_eq!(forward[..2], sample_points(&points, &range, SampleMethod::Mean)[..2]);
    }

    #[test]
    fn test_downsample_max() {
        let from = Timerange::new(0, 4, 1).unwrap();
        let to = from.resample(2).unwrap();
        let values = downsample(&[1.0, 2.0, 3.0, 4.0, 5.0], &from, &to, SampleMethod::Max);
        assert_eq!(values, vec![2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_downsample_mean_skips_nan() {
        let from = Timerange::new(0, 3, 1).unwrap();
        let to = Timerange::new(0, 2, 2).unwrap();
        let values = [1.0, f64::NAN, f64::NAN, f64::NAN];
        let values = downsample(&values, &from, &to, SampleMethod::Mean);
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
    }
}
