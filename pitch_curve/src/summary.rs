//! Peak and event-value summaries over normalized curves and cohort aggregates.
//!
//! All times here are relative frames; callers convert for display.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::aggregate::{mean, population_std, CohortAggregate};
use crate::channel::Signal;
use crate::cohort::EventMarkers;
use crate::normalize::RelativeCurve;
use crate::{Take, TakeId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurvePeak {
    pub value: f64,
    pub frame: i64,
}

/// First maximum of `values`, optionally restricted to times within `range` (inclusive).
pub fn curve_peak(times: &[i64], values: &[f64], range: Option<(i64, i64)>) -> Option<CurvePeak> {
    times
        .iter()
        .zip(values.iter())
        .filter(|(t, v)| v.is_finite() && range.map_or(true, |(lo, hi)| **t >= lo && **t <= hi))
        .rev()
        .max_by_key(|(_, v)| OrderedFloat(**v))
        .map(|(t, v)| CurvePeak {
            value: *v,
            frame: *t,
        })
}

fn value_at(times: &[i64], values: &[f64], time: Option<i64>) -> Option<f64> {
    let idx = times.binary_search(&time?).ok()?;
    Some(values[idx])
}

/// Search range for a grouped peak: pelvis and torso are limited to foot plant through BR.
fn grouped_peak_range(signal: Signal, median_fp: Option<i64>) -> Option<(i64, i64)> {
    match (signal, median_fp) {
        (Signal::PelvisAngularVelocity | Signal::TorsoAngularVelocity, Some(fp)) => Some((fp, 0)),
        _ => None,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KinematicPeak {
    pub signal: Signal,
    /// `None` for a grouped row.
    pub take_id: Option<TakeId>,
    pub session_date: NaiveDate,
    pub value: f64,
    pub frame: i64,
    /// Pelvis only: peak time after foot plant.
    pub time_from_fp_ms: Option<f64>,
}

fn pelvis_time_from_fp(signal: Signal, peak_frame: i64, fp_rel: Option<i64>, ms_per_frame: f64) -> Option<f64> {
    if signal != Signal::PelvisAngularVelocity {
        return None;
    }
    fp_rel.map(|fp| (peak_frame - fp) as f64 * ms_per_frame)
}

/// Peak of one take's normalized curve over the whole window.
pub fn take_kinematic_peak(
    signal: Signal,
    take: &Take,
    curve: &RelativeCurve,
    fp_rel: Option<i64>,
    ms_per_frame: f64,
) -> Option<KinematicPeak> {
    let peak = curve_peak(&curve.times, &curve.values, None)?;
    Some(KinematicPeak {
        signal,
        take_id: Some(take.id),
        session_date: take.session_date,
        value: peak.value,
        frame: peak.frame,
        time_from_fp_ms: pelvis_time_from_fp(signal, peak.frame, fp_rel, ms_per_frame),
    })
}

/// Peak of a grouped (aggregate) curve.
pub fn grouped_kinematic_peak(
    signal: Signal,
    session_date: NaiveDate,
    aggregate: &CohortAggregate,
    median_fp: Option<i64>,
    ms_per_frame: f64,
) -> Option<KinematicPeak> {
    let range = grouped_peak_range(signal, median_fp);
    let peak = curve_peak(&aggregate.times, &aggregate.central, range)?;
    Some(KinematicPeak {
        signal,
        take_id: None,
        session_date,
        value: peak.value,
        frame: peak.frame,
        time_from_fp_ms: pelvis_time_from_fp(signal, peak.frame, median_fp, ms_per_frame),
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JointSummary {
    pub signal: Signal,
    pub take_id: Option<TakeId>,
    pub session_date: NaiveDate,
    pub velocity_mph: Option<f64>,
    pub max: f64,
    pub at_ball_release: Option<f64>,
    pub at_foot_plant: Option<f64>,
    pub at_mer: Option<f64>,
    /// Grouped rows: population standard deviation of the per-take maxima.
    pub std_of_max: Option<f64>,
}

/// Summary of one take's curve; MER uses the take's own event, FP the cohort median.
pub fn take_joint_summary(
    signal: Signal,
    take: &Take,
    curve: &RelativeCurve,
    markers: &EventMarkers,
    mer_rel: Option<i64>,
) -> Option<JointSummary> {
    let peak = curve_peak(&curve.times, &curve.values, None)?;
    Some(JointSummary {
        signal,
        take_id: Some(take.id),
        session_date: take.session_date,
        velocity_mph: take.pitch_velocity_mph,
        max: peak.value,
        at_ball_release: curve.value_at(0),
        at_foot_plant: value_at(&curve.times, &curve.values, markers.fp),
        at_mer: value_at(&curve.times, &curve.values, mer_rel),
        std_of_max: None,
    })
}

/// Summary of a grouped curve for the takes behind it.
pub fn grouped_joint_summary(
    signal: Signal,
    session_date: NaiveDate,
    aggregate: &CohortAggregate,
    members: &[(&Take, &RelativeCurve)],
    markers: &EventMarkers,
) -> Option<JointSummary> {
    let peak = curve_peak(&aggregate.times, &aggregate.central, None)?;
    let maxima: Vec<f64> = members
        .iter()
        .filter_map(|(_, curve)| curve_peak(&curve.times, &curve.values, None).map(|p| p.value))
        .collect();
    let velocities: Vec<f64> = members
        .iter()
        .filter_map(|(take, _)| take.pitch_velocity_mph)
        .filter(|v| v.is_finite())
        .collect();
    Some(JointSummary {
        signal,
        take_id: None,
        session_date,
        velocity_mph: (!velocities.is_empty()).then(|| mean(&velocities)),
        max: peak.value,
        at_ball_release: aggregate.central_at(0),
        at_foot_plant: value_at(&aggregate.times, &aggregate.central, markers.fp),
        at_mer: value_at(&aggregate.times, &aggregate.central, markers.mer),
        std_of_max: population_std(&maxima),
    })
}

/// Most negative value per take between the median foot plant and BR.
pub fn peak_segment_power(
    curves: &BTreeMap<TakeId, RelativeCurve>,
    median_fp: Option<i64>,
) -> BTreeMap<TakeId, f64> {
    let Some(fp) = median_fp else {
        return BTreeMap::new();
    };
    curves
        .iter()
        .filter_map(|(id, curve)| {
            curve
                .times
                .iter()
                .zip(curve.values.iter())
                .filter(|(t, v)| **t >= fp && **t <= 0 && v.is_finite())
                .map(|(_, v)| *v)
                .min_by_key(|v| OrderedFloat(*v))
                .map(|v| (*id, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CentralStat, Handedness, TimeUnit};
    use approx::assert_relative_eq;

    fn take(id: i64, mph: Option<f64>) -> Take {
        Take {
            id: TakeId(id),
            handedness: Some(Handedness::Right),
            session_date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            pitch_velocity_mph: mph,
        }
    }

    fn rel(times: &[i64], values: &[f64]) -> RelativeCurve {
        RelativeCurve {
            unit: TimeUnit::Frames,
            times: times.to_vec(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_curve_peak_first_on_ties() {
        let peak = curve_peak(&[-3, -2, -1, 0], &[1.0, 5.0, 5.0, 2.0], None).unwrap();
        assert_eq!(peak.frame, -2);
        assert_eq!(curve_peak(&[], &[], None), None);
    }

    #[test]
    fn test_curve_peak_restricted_range() {
        let times = [-30, -20, -10, 0, 10];
        let values = [9.0, 3.0, 4.0, 2.0, 8.0];
        let peak = curve_peak(&times, &values, Some((-20, 0))).unwrap();
        assert_eq!((peak.frame, peak.value), (-10, 4.0));
        assert_eq!(curve_peak(&times, &values, Some((1, 5))), None);
    }

    #[test]
    fn test_pelvis_time_from_fp() {
        let t = take(1, Some(90.0));
        let curve = rel(&[-30, -20, -10], &[100.0, 600.0, 300.0]);
        let peak =
            take_kinematic_peak(Signal::PelvisAngularVelocity, &t, &curve, Some(-25), 4.0).unwrap();
        assert_eq!(peak.frame, -20);
        assert_relative_eq!(peak.time_from_fp_ms.unwrap(), 20.0);

        let torso =
            take_kinematic_peak(Signal::TorsoAngularVelocity, &t, &curve, Some(-25), 4.0).unwrap();
        assert_eq!(torso.time_from_fp_ms, None);
    }

    #[test]
    fn test_grouped_pelvis_peak_limited_to_fp_through_br() {
        let curves = [rel(&[-40, -20, 0, 10], &[900.0, 500.0, 400.0, 1000.0])];
        let agg = crate::aggregate::aggregate_curves(&curves, CentralStat::Mean);
        let date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();

        let pelvis =
            grouped_kinematic_peak(Signal::PelvisAngularVelocity, date, &agg, Some(-25), 4.0)
                .unwrap();
        assert_eq!(pelvis.frame, -20);
        assert_relative_eq!(pelvis.time_from_fp_ms.unwrap(), 20.0);

        let elbow =
            grouped_kinematic_peak(Signal::ElbowAngularVelocity, date, &agg, Some(-25), 4.0)
                .unwrap();
        assert_eq!(elbow.frame, 10);

        assert!(grouped_kinematic_peak(Signal::TorsoAngularVelocity, date, &agg, Some(5), 4.0)
            .is_none());
    }

    #[test]
    fn test_joint_summaries() {
        let a = take(1, Some(90.0));
        let b = take(2, Some(94.0));
        let ca = rel(&[-25, -5, 0], &[10.0, 30.0, 20.0]);
        let cb = rel(&[-25, -5, 0], &[14.0, 34.0, 24.0]);
        let markers = EventMarkers {
            pkh: Some(-60),
            fp: Some(-25),
            mer: Some(-5),
        };

        let single = take_joint_summary(Signal::ShoulderEr, &a, &ca, &markers, Some(-5)).unwrap();
        assert_eq!(single.max, 30.0);
        assert_eq!(single.at_ball_release, Some(20.0));
        assert_eq!(single.at_foot_plant, Some(10.0));
        assert_eq!(single.at_mer, Some(30.0));

        let agg = crate::aggregate::aggregate_curves([&ca, &cb], CentralStat::Mean);
        let grouped = grouped_joint_summary(
            Signal::ShoulderEr,
            a.session_date,
            &agg,
            &[(&a, &ca), (&b, &cb)],
            &markers,
        )
        .unwrap();
        assert_relative_eq!(grouped.max, 32.0);
        assert_relative_eq!(grouped.at_mer.unwrap(), 32.0);
        assert_relative_eq!(grouped.std_of_max.unwrap(), 2.0);
        assert_relative_eq!(grouped.velocity_mph.unwrap(), 92.0);
    }

    #[test]
    fn test_peak_segment_power_is_min_in_fp_br() {
        let mut curves = BTreeMap::new();
        curves.insert(TakeId(1), rel(&[-40, -20, -5, 5], &[-900.0, -300.0, -450.0, -2000.0]));
        curves.insert(TakeId(2), rel(&[10, 20], &[-1.0, -2.0]));
        let peaks = peak_segment_power(&curves, Some(-25));
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[&TakeId(1)], -450.0);
        assert!(peak_segment_power(&curves, None).is_empty());
    }
}
