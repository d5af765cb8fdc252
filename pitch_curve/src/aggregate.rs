//! Cohort curve aggregation: central statistic and interquartile band per relative time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::{frames_to_ms, ms_to_frames, RelativeCurve};
use crate::savgol::savgol_filter;
use crate::{CentralStat, PcError, TimeUnit};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CohortAggregate {
    pub unit: TimeUnit,
    pub times: Vec<i64>,
    pub central: Vec<f64>,
    pub low: Vec<f64>,
    pub high: Vec<f64>,
    /// Number of take curves contributing at each time.
    pub counts: Vec<usize>,
    pub smoothed: bool,
}

impl CohortAggregate {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn central_at(&self, time: i64) -> Option<f64> {
        self.times
            .binary_search(&time)
            .ok()
            .map(|idx| self.central[idx])
    }

    pub fn to_unit(&self, unit: TimeUnit, sampling_rate_hz: f64) -> CohortAggregate {
        let times = match (self.unit, unit) {
            (TimeUnit::Frames, TimeUnit::Milliseconds) => self
                .times
                .iter()
                .map(|&t| frames_to_ms(t, sampling_rate_hz))
                .collect(),
            (TimeUnit::Milliseconds, TimeUnit::Frames) => self
                .times
                .iter()
                .map(|&t| ms_to_frames(t, sampling_rate_hz))
                .collect(),
            _ => self.times.clone(),
        };
        CohortAggregate {
            unit,
            times,
            ..self.clone()
        }
    }

    /// Replace the central sequence with its Savitzky–Golay smoothing when there are at least
    /// `min_points` samples; shorter aggregates are returned untouched.
    pub fn smoothed(
        mut self,
        window: usize,
        polyorder: usize,
        min_points: usize,
    ) -> Result<Self, PcError> {
        if self.len() < min_points.max(window) {
            return Ok(self);
        }
        self.central = savgol_filter(&self.central, window, polyorder)?;
        self.smoothed = true;
        Ok(self)
    }
}

/// Aggregate take curves sharing one time unit.
///
/// Every distinct time across the curves becomes a candidate point; a time without at least
/// one finite contribution is omitted.
pub fn aggregate_curves<'a, I>(curves: I, central: CentralStat) -> CohortAggregate
where
    I: IntoIterator<Item = &'a RelativeCurve>,
{
    let mut unit = TimeUnit::default();
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for curve in curves {
        unit = curve.unit;
        for (&time, &value) in curve.times.iter().zip(curve.values.iter()) {
            let bucket = buckets.entry(time).or_default();
            if value.is_finite() {
                bucket.push(value);
            }
        }
    }

    let mut out = CohortAggregate {
        unit,
        ..CohortAggregate::default()
    };
    for (time, mut values) in buckets {
        if values.is_empty() {
            continue;
        }
        values.sort_by(f64::total_cmp);
        let centre = match central {
            CentralStat::Mean => mean(&values),
            CentralStat::Median => percentile_sorted(&values, 50.0),
        };
        out.times.push(time);
        out.central.push(centre);
        out.low.push(percentile_sorted(&values, 25.0));
        out.high.push(percentile_sorted(&values, 75.0));
        out.counts.push(values.len());
    }
    out
}

/// Linear-interpolated percentile (position `p / 100 * (n - 1)` in sorted order).
///
/// Non-finite values are ignored. Returns `Ok(None)` when nothing is left.
pub fn percentile(values: &[f64], p: f64) -> Result<Option<f64>, PcError> {
    if !(0.0..=100.0).contains(&p) {
        return Err(PcError::InvalidParameter(format!(
            "percentile {p} outside 0..=100"
        )));
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Ok(None);
    }
    sorted.sort_by(f64::total_cmp);
    Ok(Some(percentile_sorted(&sorted, p)))
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let pos = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of finite values.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let m = mean(&finite);
    let var = finite.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / finite.len() as f64;
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rel(times: &[i64], values: &[f64]) -> RelativeCurve {
        RelativeCurve {
            unit: TimeUnit::Frames,
            times: times.to_vec(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_aggregate_three_takes_at_zero() {
        let curves = vec![rel(&[0], &[10.0]), rel(&[0], &[20.0]), rel(&[0], &[30.0])];
        let mean_agg = aggregate_curves(&curves, CentralStat::Mean);
        assert_eq!(mean_agg.times, vec![0]);
        assert_relative_eq!(mean_agg.central[0], 20.0);
        assert_relative_eq!(mean_agg.low[0], 15.0);
        assert_relative_eq!(mean_agg.high[0], 25.0);
        assert_eq!(mean_agg.counts, vec![3]);

        let median_agg = aggregate_curves(&curves, CentralStat::Median);
        assert_relative_eq!(median_agg.central[0], 20.0);
    }

    #[test]
    fn test_aggregate_unions_times_without_interpolation() {
        let curves = vec![rel(&[-2, 0], &[1.0, 3.0]), rel(&[0, 4], &[5.0, 7.0])];
        let agg = aggregate_curves(&curves, CentralStat::Mean);
        assert_eq!(agg.times, vec![-2, 0, 4]);
        assert_eq!(agg.central, vec![1.0, 4.0, 7.0]);
        assert_eq!(agg.counts, vec![1, 2, 1]);
    }

    #[test]
    fn test_aggregate_never_emits_nan() {
        let curves = vec![
            rel(&[0, 1], &[f64::NAN, 2.0]),
            rel(&[0, 1], &[f64::INFINITY, f64::NAN]),
        ];
        let agg = aggregate_curves(&curves, CentralStat::Mean);
        assert_eq!(agg.times, vec![1]);
        assert!(agg
            .central
            .iter()
            .chain(agg.low.iter())
            .chain(agg.high.iter())
            .all(|v| v.is_finite()));
    }

    #[test]
    fn test_aggregate_empty_input() {
        let agg = aggregate_curves(&Vec::<RelativeCurve>::new(), CentralStat::Median);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_percentile_linear() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_relative_eq!(percentile(&v, 25.0).unwrap().unwrap(), 1.75);
        assert_relative_eq!(percentile(&v, 50.0).unwrap().unwrap(), 2.5);
        assert_relative_eq!(percentile(&v, 100.0).unwrap().unwrap(), 4.0);
        assert!(percentile(&v, 101.0).is_err());
        assert_eq!(percentile(&[f64::NAN], 50.0).unwrap(), None);
    }

    #[test]
    fn test_population_std() {
        assert_relative_eq!(population_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap(), 2.0);
        assert_eq!(population_std(&[]), None);
    }

    #[test]
    fn test_smoothing_skipped_below_min_points() {
        let times: Vec<i64> = (0..10).collect();
        let values: Vec<f64> = times.iter().map(|t| if t % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let agg = aggregate_curves(&[rel(&times, &values)], CentralStat::Mean);
        let out = agg.clone().smoothed(7, 3, 11).unwrap();
        assert!(!out.smoothed);
        assert_eq!(out.central, agg.central);
    }

    #[test]
    fn test_smoothing_keeps_bands() {
        let times: Vec<i64> = (-10..=10).collect();
        let values: Vec<f64> = times.iter().map(|t| if t % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let agg = aggregate_curves(&[rel(&times, &values)], CentralStat::Mean);
        let out = agg.clone().smoothed(7, 3, 11).unwrap();
        assert!(out.smoothed);
        assert_eq!(out.low, agg.low);
        assert_eq!(out.high, agg.high);
        assert_ne!(out.central, agg.central);
    }
}
