//! Pitching event detection.
//!
//! Each detector maps `TakeId -> frame` and consumes the outputs of the ones before it:
//! ball release (BR), max external rotation (MER), peak knee height (PKH), peak ankle proximal
//! velocity and the two foot plant variants. A take missing from a map has no such event.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{ChannelSource, Signal};
use crate::{Handedness, Params, SignalCurve, Take, TakeId};

pub type EventMap = BTreeMap<TakeId, i64>;
pub type CurveMap = BTreeMap<TakeId, SignalCurve>;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    #[serde(rename = "BR")]
    BallRelease,
    #[serde(rename = "MER")]
    MaxExternalRotation,
    #[serde(rename = "PKH")]
    PeakKneeHeight,
    #[serde(rename = "PeakAnklePX")]
    PeakAnkleProxVelocity,
    #[serde(rename = "FP_coarse")]
    FootPlantCoarse,
    #[serde(rename = "FP_zero_cross")]
    FootPlantZeroCross,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::BallRelease,
        EventKind::MaxExternalRotation,
        EventKind::PeakKneeHeight,
        EventKind::PeakAnkleProxVelocity,
        EventKind::FootPlantCoarse,
        EventKind::FootPlantZeroCross,
    ];

    pub fn code(self) -> &'static str {
        match self {
            EventKind::BallRelease => "BR",
            EventKind::MaxExternalRotation => "MER",
            EventKind::PeakKneeHeight => "PKH",
            EventKind::PeakAnkleProxVelocity => "PeakAnklePX",
            EventKind::FootPlantCoarse => "FP_coarse",
            EventKind::FootPlantZeroCross => "FP_zero_cross",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raw channels the detector chain reads, keyed by take.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventInputs {
    pub hand_velocity: CurveMap,
    pub shoulder_angle: CurveMap,
    pub knee_height: CurveMap,
    pub ankle_prox_velocity: CurveMap,
    pub ankle_dist_velocity: CurveMap,
}

/// Absolute event frames for every take of a cohort.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CohortEvents {
    pub br: EventMap,
    pub mer: EventMap,
    pub pkh: EventMap,
    pub peak_ankle_px: EventMap,
    pub fp_coarse: EventMap,
    pub fp_zero_cross: EventMap,
}

impl CohortEvents {
    pub fn get(&self, kind: EventKind) -> &EventMap {
        match kind {
            EventKind::BallRelease => &self.br,
            EventKind::MaxExternalRotation => &self.mer,
            EventKind::PeakKneeHeight => &self.pkh,
            EventKind::PeakAnkleProxVelocity => &self.peak_ankle_px,
            EventKind::FootPlantCoarse => &self.fp_coarse,
            EventKind::FootPlantZeroCross => &self.fp_zero_cross,
        }
    }

    pub fn frame(&self, kind: EventKind, take: TakeId) -> Option<i64> {
        self.get(kind).get(&take).copied()
    }

    /// Event frames relative to each take's ball release. Takes without BR are dropped.
    pub fn relative_frames(&self, kind: EventKind) -> EventMap {
        self.get(kind)
            .iter()
            .filter_map(|(id, frame)| self.br.get(id).map(|br| (*id, frame - br)))
            .collect()
    }
}

/// Frame of the maximum hand CG velocity. Ties resolve to the earliest frame.
pub fn detect_ball_release(hand_velocity: &CurveMap) -> EventMap {
    hand_velocity
        .iter()
        .filter_map(|(id, curve)| earliest_max(curve.valid()).map(|f| (*id, f)))
        .collect()
}

/// Frame of the extreme shoulder rotation at or before BR: the minimum for right-handed
/// throwers, the maximum for left-handed ones.
pub fn detect_max_external_rotation(
    shoulder_angle: &CurveMap,
    br: &EventMap,
    handedness: &BTreeMap<TakeId, Handedness>,
) -> EventMap {
    let mut out = EventMap::new();
    for (id, curve) in shoulder_angle {
        let (Some(&br_frame), Some(&hand)) = (br.get(id), handedness.get(id)) else {
            continue;
        };
        let before = curve.valid().filter(|(f, _)| *f <= br_frame);
        let found = match hand {
            Handedness::Right => before
                .min_by_key(|(_, v)| OrderedFloat(*v))
                .map(|(f, _)| f),
            Handedness::Left => earliest_max(before),
        };
        if let Some(frame) = found {
            out.insert(*id, frame);
        }
    }
    out
}

/// Highest lead knee position strictly before BR; equal heights resolve to the earliest frame.
pub fn detect_peak_knee_height(knee_height: &CurveMap, br: &EventMap) -> EventMap {
    let mut out = EventMap::new();
    for (id, curve) in knee_height {
        let Some(&br_frame) = br.get(id) else {
            continue;
        };
        let mut candidates: Vec<(i64, f64)> = curve.valid().collect();
        candidates.sort_by_key(|(f, v)| (Reverse(OrderedFloat(*v)), *f));
        if let Some((frame, _)) = candidates.into_iter().find(|(f, _)| *f < br_frame) {
            out.insert(*id, frame);
        }
    }
    out
}

/// Earliest frame of the global maximum lead ankle proximal velocity.
pub fn detect_peak_ankle_prox_velocity(ankle_prox_velocity: &CurveMap) -> EventMap {
    ankle_prox_velocity
        .iter()
        .filter_map(|(id, curve)| earliest_max(curve.valid()).map(|f| (*id, f)))
        .collect()
}

/// Last frame in `[PKH, BR]` where the lead ankle is still moving down.
pub fn detect_foot_plant_coarse(
    ankle_dist_velocity: &CurveMap,
    pkh: &EventMap,
    br: &EventMap,
) -> EventMap {
    let mut out = EventMap::new();
    for (id, curve) in ankle_dist_velocity {
        let (Some(&start), Some(&end)) = (pkh.get(id), br.get(id)) else {
            continue;
        };
        let last = curve
            .valid()
            .filter(|(f, v)| *f >= start && *f <= end && *v < 0.0)
            .last();
        if let Some((frame, _)) = last {
            out.insert(*id, frame);
        }
    }
    out
}

/// First frame in `[PeakAnklePX, MER]` where the lead ankle vertical velocity reaches
/// `threshold`, reported one frame earlier.
pub fn detect_foot_plant_zero_cross(
    ankle_dist_velocity: &CurveMap,
    peak_ankle_px: &EventMap,
    mer: &EventMap,
    threshold: f64,
) -> EventMap {
    let mut out = EventMap::new();
    for (id, curve) in ankle_dist_velocity {
        let (Some(&start), Some(&end)) = (peak_ankle_px.get(id), mer.get(id)) else {
            continue;
        };
        let first = curve
            .valid()
            .find(|(f, v)| *f >= start && *f <= end && *v >= threshold);
        if let Some((frame, _)) = first {
            out.insert(*id, frame - 1);
        }
    }
    out
}

/// Run the full detector chain.
pub fn detect_events(
    inputs: &EventInputs,
    handedness: &BTreeMap<TakeId, Handedness>,
    params: &Params,
) -> CohortEvents {
    let br = detect_ball_release(&inputs.hand_velocity);
    let mer = detect_max_external_rotation(&inputs.shoulder_angle, &br, handedness);
    let pkh = detect_peak_knee_height(&inputs.knee_height, &br);
    let peak_ankle_px = detect_peak_ankle_prox_velocity(&inputs.ankle_prox_velocity);
    let fp_coarse = detect_foot_plant_coarse(&inputs.ankle_dist_velocity, &pkh, &br);
    let fp_zero_cross = detect_foot_plant_zero_cross(
        &inputs.ankle_dist_velocity,
        &peak_ankle_px,
        &mer,
        params.zero_cross_threshold,
    );

    debug!(
        takes = handedness.len(),
        br = br.len(),
        mer = mer.len(),
        pkh = pkh.len(),
        peak_ankle_px = peak_ankle_px.len(),
        fp_coarse = fp_coarse.len(),
        fp_zero_cross = fp_zero_cross.len(),
        "detected events"
    );

    CohortEvents {
        br,
        mer,
        pkh,
        peak_ankle_px,
        fp_coarse,
        fp_zero_cross,
    }
}

/// Load every channel the detector chain needs.
pub fn fetch_event_inputs<S: ChannelSource + ?Sized>(source: &S, takes: &[Take]) -> EventInputs {
    EventInputs {
        hand_velocity: Signal::HandCgVelocity.fetch(source, takes),
        shoulder_angle: Signal::ShoulderAngle.fetch(source, takes),
        knee_height: Signal::LeadKneePosition.fetch(source, takes),
        ankle_prox_velocity: Signal::LeadAnkleProxVelocity.fetch(source, takes),
        ankle_dist_velocity: Signal::LeadAnkleDistVelocity.fetch(source, takes),
    }
}

/// `max_by_key` keeps the last of equal maxima, so scan in reverse to keep the first.
fn earliest_max<I>(samples: I) -> Option<i64>
where
    I: DoubleEndedIterator<Item = (i64, f64)>,
{
    samples
        .rev()
        .max_by_key(|(_, v)| OrderedFloat(*v))
        .map(|(f, _)| f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curves(id: i64, samples: &[(i64, f64)]) -> CurveMap {
        let mut map = CurveMap::new();
        map.insert(TakeId(id), SignalCurve::from_samples(samples));
        map
    }

    fn events(id: i64, frame: i64) -> EventMap {
        let mut map = EventMap::new();
        map.insert(TakeId(id), frame);
        map
    }

    fn hands(id: i64, hand: Handedness) -> BTreeMap<TakeId, Handedness> {
        let mut map = BTreeMap::new();
        map.insert(TakeId(id), hand);
        map
    }

    #[test]
    fn test_ball_release_is_max_frame() {
        let hv = curves(1, &[(0, 1.0), (1, 5.0), (2, 3.0)]);
        assert_eq!(detect_ball_release(&hv)[&TakeId(1)], 1);
    }

    #[test]
    fn test_ball_release_tie_picks_first() {
        let hv = curves(1, &[(10, 2.0), (11, 7.0), (12, 7.0), (13, 1.0)]);
        assert_eq!(detect_ball_release(&hv)[&TakeId(1)], 11);
    }

    #[test]
    fn test_ball_release_all_null_is_absent() {
        let mut hv = CurveMap::new();
        hv.insert(TakeId(1), SignalCurve::new(vec![0, 1], vec![None, None]));
        assert!(detect_ball_release(&hv).is_empty());
    }

    #[test]
    fn test_mer_requires_sample_before_br() {
        let sa = curves(1, &[(50, -100.0), (60, -120.0)]);
        let mer = detect_max_external_rotation(&sa, &events(1, 40), &hands(1, Handedness::Right));
        assert!(mer.is_empty());
    }

    #[test]
    fn test_mer_right_is_min_left_is_max() {
        let samples = [(0, -10.0), (1, -150.0), (2, 40.0), (3, -150.0), (4, -200.0)];
        let sa = curves(1, &samples);
        let br = events(1, 3);

        let right = detect_max_external_rotation(&sa, &br, &hands(1, Handedness::Right));
        assert_eq!(right[&TakeId(1)], 1);
        let value = samples.iter().find(|(f, _)| *f == right[&TakeId(1)]).unwrap().1;
        assert!(samples
            .iter()
            .filter(|(f, _)| *f <= 3)
            .all(|(_, v)| value <= *v));

        let left = detect_max_external_rotation(&sa, &br, &hands(1, Handedness::Left));
        assert_eq!(left[&TakeId(1)], 2);
    }

    #[test]
    fn test_mer_unknown_handedness_is_absent() {
        let sa = curves(1, &[(0, 1.0)]);
        let mer = detect_max_external_rotation(&sa, &events(1, 5), &BTreeMap::new());
        assert!(mer.is_empty());
    }

    #[test]
    fn test_pkh_is_before_br() {
        let kh = curves(1, &[(10, 0.5), (20, 0.9), (30, 0.7), (40, 0.2)]);
        let pkh = detect_peak_knee_height(&kh, &events(1, 35));
        assert_eq!(pkh[&TakeId(1)], 20);
        assert!(pkh[&TakeId(1)] < 35);
    }

    #[test]
    fn test_pkh_skips_peak_after_br() {
        let kh = curves(1, &[(10, 0.5), (20, 0.6), (50, 1.5)]);
        let pkh = detect_peak_knee_height(&kh, &events(1, 40));
        assert_eq!(pkh[&TakeId(1)], 20);

        let only_after = curves(1, &[(50, 1.5), (60, 1.0)]);
        assert!(detect_peak_knee_height(&only_after, &events(1, 40)).is_empty());
    }

    #[test]
    fn test_peak_ankle_prox_velocity_earliest_max() {
        let av = curves(1, &[(5, 1.0), (6, 3.0), (7, 3.0), (8, 2.0)]);
        assert_eq!(detect_peak_ankle_prox_velocity(&av)[&TakeId(1)], 6);
    }

    #[test]
    fn test_foot_plant_coarse_last_negative() {
        let samples: Vec<(i64, f64)> = (0..=30)
            .map(|f| (f, if f == 10 || f == 15 { -0.4 } else { 0.2 }))
            .collect();
        let dv = curves(1, &samples);
        let fp = detect_foot_plant_coarse(&dv, &events(1, 5), &events(1, 25));
        assert_eq!(fp[&TakeId(1)], 15);
    }

    #[test]
    fn test_foot_plant_coarse_requires_pkh() {
        let dv = curves(1, &[(10, -1.0)]);
        assert!(detect_foot_plant_coarse(&dv, &EventMap::new(), &events(1, 25)).is_empty());
    }

    #[test]
    fn test_foot_plant_zero_cross_first_crossing_minus_one() {
        let samples: Vec<(i64, f64)> = (10..=30)
            .map(|f| {
                let v = match f {
                    20 => 0.0,
                    25 => 0.3,
                    _ => -0.5,
                };
                (f, v)
            })
            .collect();
        let dv = curves(1, &samples);
        let fp = detect_foot_plant_zero_cross(&dv, &events(1, 10), &events(1, 30), -0.05);
        assert_eq!(fp[&TakeId(1)], 19);
    }

    #[test]
    fn test_foot_plant_zero_cross_respects_window() {
        let dv = curves(1, &[(5, 0.0), (12, -0.5), (40, 0.0)]);
        let fp = detect_foot_plant_zero_cross(&dv, &events(1, 10), &events(1, 30), -0.05);
        assert!(fp.is_empty());
    }

    #[test]
    fn test_foot_plant_coarse_window_is_inclusive() {
        let at_br = curves(1, &[(5, 0.2), (10, -0.3), (25, -0.1), (26, -0.9)]);
        let fp = detect_foot_plant_coarse(&at_br, &events(1, 5), &events(1, 25));
        assert_eq!(fp[&TakeId(1)], 25);

        let at_pkh = curves(1, &[(4, -0.9), (5, -0.2), (6, 0.1), (25, 0.3)]);
        let fp = detect_foot_plant_coarse(&at_pkh, &events(1, 5), &events(1, 25));
        assert_eq!(fp[&TakeId(1)], 5);
    }

    #[test]
    fn test_foot_plant_zero_cross_window_is_inclusive() {
        let at_start = curves(1, &[(9, 0.0), (10, 0.0), (11, -0.5), (20, 0.0)]);
        let fp = detect_foot_plant_zero_cross(&at_start, &events(1, 10), &events(1, 30), -0.05);
        assert_eq!(fp[&TakeId(1)], 9);

        let at_end = curves(1, &[(10, -0.5), (20, -0.4), (30, -0.05), (31, 0.2)]);
        let fp = detect_foot_plant_zero_cross(&at_end, &events(1, 10), &events(1, 30), -0.05);
        assert_eq!(fp[&TakeId(1)], 29);
    }

    #[test]
    fn test_chain_is_idempotent() {
        let inputs = EventInputs {
            hand_velocity: curves(1, &[(0, 1.0), (50, 9.0), (60, 2.0)]),
            shoulder_angle: curves(1, &[(30, -20.0), (45, -160.0), (55, -10.0)]),
            knee_height: curves(1, &[(5, 0.4), (10, 0.8), (20, 0.3)]),
            ankle_prox_velocity: curves(1, &[(15, 1.0), (20, 4.0), (30, 2.0)]),
            ankle_dist_velocity: curves(1, &[(20, -1.0), (25, -0.5), (30, 0.1), (35, 0.2)]),
        };
        let hand = hands(1, Handedness::Right);
        let params = Params::default();
        let first = detect_events(&inputs, &hand, &params);
        let second = detect_events(&inputs, &hand, &params);
        assert_eq!(first, second);
        assert_eq!(first.frame(EventKind::BallRelease, TakeId(1)), Some(50));
        assert_eq!(first.frame(EventKind::MaxExternalRotation, TakeId(1)), Some(45));
        assert_eq!(first.frame(EventKind::PeakKneeHeight, TakeId(1)), Some(10));
        assert_eq!(first.frame(EventKind::PeakAnkleProxVelocity, TakeId(1)), Some(20));
        assert_eq!(first.frame(EventKind::FootPlantCoarse, TakeId(1)), Some(25));
        assert_eq!(first.frame(EventKind::FootPlantZeroCross, TakeId(1)), Some(29));
        assert_eq!(
            first.relative_frames(EventKind::FootPlantZeroCross)[&TakeId(1)],
            -21
        );
    }

    #[test]
    fn test_relative_frames_drop_takes_without_br() {
        let mut ev = CohortEvents::default();
        ev.br.insert(TakeId(1), 100);
        ev.mer.insert(TakeId(1), 95);
        ev.mer.insert(TakeId(2), 80);
        let rel = ev.relative_frames(EventKind::MaxExternalRotation);
        assert_eq!(rel.len(), 1);
        assert_eq!(rel[&TakeId(1)], -5);
    }
}
