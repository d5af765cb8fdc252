//! BR-relative time base, the cohort plot window and per-signal sign normalization.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cohort::median_frame;
use crate::events::{CurveMap, EventMap};
use crate::{Handedness, Params, SignalCurve, TakeId, TimeUnit};

/// How a signal's sign is aligned across throwing sides.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SignPolicy {
    #[default]
    Preserve,
    /// Negate left-handed takes.
    NegateLeft,
    /// Negate right-handed takes.
    NegateRight,
    /// Negate every take.
    AlwaysNegate,
    /// Negate a take whose largest-magnitude sample is negative, so the dominant peak plots
    /// upward. A single-sample spike can flip the whole take.
    DominantPeak,
}

impl SignPolicy {
    /// Multiplier for one take's curve.
    pub fn factor(self, handedness: Option<Handedness>, curve: &SignalCurve) -> f64 {
        match (self, handedness) {
            (SignPolicy::Preserve, _) => 1.0,
            (SignPolicy::NegateLeft, Some(Handedness::Left)) => -1.0,
            (SignPolicy::NegateRight, Some(Handedness::Right)) => -1.0,
            (SignPolicy::NegateLeft | SignPolicy::NegateRight, _) => 1.0,
            (SignPolicy::AlwaysNegate, _) => -1.0,
            (SignPolicy::DominantPeak, _) => {
                let dominant = curve
                    .valid()
                    .rev()
                    .max_by_key(|(_, v)| OrderedFloat(v.abs()))
                    .map(|(_, v)| v);
                match dominant {
                    Some(v) if v < 0.0 => -1.0,
                    _ => 1.0,
                }
            }
        }
    }
}

/// Inclusive relative-frame range shared by every signal of a cohort.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlotWindow {
    pub start: i64,
    pub end: i64,
    /// False when no take had a zero-cross foot plant and the fallback start was used.
    pub from_foot_plant: bool,
}

impl PlotWindow {
    pub fn contains(&self, rel: i64) -> bool {
        rel >= self.start && rel <= self.end
    }
}

/// Derive the plot window from the zero-cross foot plant frames relative to BR.
pub fn cohort_window(fp_zero_cross_rel: &EventMap, params: &Params) -> PlotWindow {
    match median_frame(fp_zero_cross_rel.values().copied()) {
        Some(median) => {
            let window = PlotWindow {
                start: median - params.window_lead_frames,
                end: params.window_end_frames,
                from_foot_plant: true,
            };
            debug!(median_fp = median, start = window.start, end = window.end, "cohort window");
            window
        }
        None => {
            warn!(
                start = params.fallback_window_start,
                "no zero-cross foot plant in cohort, using fallback window"
            );
            PlotWindow {
                start: params.fallback_window_start,
                end: params.window_end_frames,
                from_foot_plant: false,
            }
        }
    }
}

/// Relative-frame to milliseconds, rounded to the nearest integer.
pub fn frames_to_ms(rel: i64, sampling_rate_hz: f64) -> i64 {
    (rel as f64 * 1000.0 / sampling_rate_hz).round() as i64
}

pub fn ms_to_frames(ms: i64, sampling_rate_hz: f64) -> i64 {
    (ms as f64 * sampling_rate_hz / 1000.0).round() as i64
}

/// One take's curve on the BR-relative axis.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RelativeCurve {
    pub unit: TimeUnit,
    pub times: Vec<i64>,
    pub values: Vec<f64>,
}

impl RelativeCurve {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Value at an exact relative time.
    pub fn value_at(&self, time: i64) -> Option<f64> {
        self.times
            .binary_search(&time)
            .ok()
            .map(|idx| self.values[idx])
    }

    pub fn to_unit(&self, unit: TimeUnit, sampling_rate_hz: f64) -> RelativeCurve {
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
        RelativeCurve {
            unit,
            times,
            values: self.values.clone(),
        }
    }
}

/// Re-base one take's curve onto BR, keep the window, apply the sign factor.
pub fn relative_curve(curve: &SignalCurve, br: i64, window: &PlotWindow, factor: f64) -> RelativeCurve {
    let (times, values): (Vec<i64>, Vec<f64>) = curve
        .valid()
        .map(|(frame, value)| (frame - br, value * factor))
        .filter(|(rel, _)| window.contains(*rel))
        .unzip();
    RelativeCurve {
        unit: TimeUnit::Frames,
        times,
        values,
    }
}

/// Normalize a signal for a cohort. Takes without BR are dropped; takes whose curve has no
/// sample inside the window keep an empty curve.
pub fn normalize_signal(
    curves: &CurveMap,
    br: &EventMap,
    handedness: &BTreeMap<TakeId, Handedness>,
    window: &PlotWindow,
    policy: SignPolicy,
) -> BTreeMap<TakeId, RelativeCurve> {
    curves
        .iter()
        .filter_map(|(id, curve)| {
            let br_frame = *br.get(id)?;
            let factor = policy.factor(handedness.get(id).copied(), curve);
            Some((*id, relative_curve(curve, br_frame, window, factor)))
        })
        .collect()
}
