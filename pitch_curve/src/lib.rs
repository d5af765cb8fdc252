//! Core pitching curve library: event detection, BR-relative time normalization and cohort
//! curve aggregation over motion-capture takes.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod channel;
pub mod cohort;
pub mod events;
pub mod normalize;
pub mod pipeline;
pub mod savgol;
pub mod summary;

pub use aggregate::{aggregate_curves, percentile, CohortAggregate};
pub use channel::{
    fetch_axes, fetch_signal, Axis, ChannelRow, ChannelSource, InMemoryStore, MultiAxisCurve,
    SegmentResolver, Signal, SignalDescriptor, SignalFamily, StoreRow,
};
pub use cohort::{assign_pitch_order, median_frame, velocity_bounds, CohortFilter, EventMarkers};
pub use events::{detect_events, fetch_event_inputs, CohortEvents, EventInputs, EventKind, EventMap};
pub use normalize::{cohort_window, frames_to_ms, ms_to_frames, PlotWindow, RelativeCurve, SignPolicy};
pub use pipeline::{run_cohort, CohortReport, SignalReport};

/// Kinematic capture rate (frames per second).
pub const SAMPLING_RATE_HZ: f64 = 250.0;
/// Frames kept before the median foot plant when opening the plot window.
pub const WINDOW_LEAD_FRAMES: i64 = 50;
/// Last frame (relative to ball release) kept in the plot window.
pub const WINDOW_END_FRAMES: i64 = 50;
/// Window start used when no take in the cohort has a zero-cross foot plant.
pub const FALLBACK_WINDOW_START: i64 = -100;
/// Lead ankle vertical velocity at or above this value counts as planted.
pub const ZERO_CROSS_THRESHOLD: f64 = -0.05;
pub const SAVGOL_MIN_POINTS: usize = 11;
pub const SAVGOL_POLYORDER: usize = 3;

#[derive(Error, Debug)]
pub enum PcError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("unknown signal: {0}")]
    UnknownSignal(String),
    #[error("failed to parse input: {0}")]
    Parse(String),
    #[error("singular system: {0}")]
    Singular(String),
}

/// Opaque take (single recorded throw) identifier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TakeId(pub i64);

impl fmt::Display for TakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Throwing arm.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Handedness {
    #[serde(rename = "R")]
    Right,
    #[serde(rename = "L")]
    Left,
}

impl Handedness {
    /// Parse the store's `R`/`L` code. Anything else is treated as unknown.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim() {
            "R" => Some(Handedness::Right),
            "L" => Some(Handedness::Left),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Handedness::Right => "R",
            Handedness::Left => "L",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Take {
    pub id: TakeId,
    pub handedness: Option<Handedness>,
    pub session_date: NaiveDate,
    pub pitch_velocity_mph: Option<f64>,
}

/// One channel of one take: frames in ascending order with possibly missing values.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalCurve {
    pub frames: Vec<i64>,
    pub values: Vec<Option<f64>>,
}

impl SignalCurve {
    pub fn new(frames: Vec<i64>, values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(frames.len(), values.len());
        Self { frames, values }
    }

    /// Build a curve from fully populated samples.
    pub fn from_samples(samples: &[(i64, f64)]) -> Self {
        Self {
            frames: samples.iter().map(|(f, _)| *f).collect(),
            values: samples.iter().map(|(_, v)| Some(*v)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Samples with a usable value, in frame order. Missing and non-finite values are skipped.
    pub fn valid(&self) -> impl DoubleEndedIterator<Item = (i64, f64)> + '_ {
        self.frames
            .iter()
            .zip(self.values.iter())
            .filter_map(|(&frame, value)| match value {
                Some(v) if v.is_finite() => Some((frame, *v)),
                _ => None,
            })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CentralStat {
    #[default]
    Mean,
    Median,
}

impl FromStr for CentralStat {
    type Err = PcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(CentralStat::Mean),
            "median" => Ok(CentralStat::Median),
            other => Err(PcError::InvalidParameter(format!(
                "central statistic '{other}' (expected mean|median)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Frames,
    Milliseconds,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub sampling_rate_hz: f64,
    pub window_lead_frames: i64,
    pub window_end_frames: i64,
    pub fallback_window_start: i64,
    pub zero_cross_threshold: f64,
    pub central: CentralStat,
    pub smooth: bool,
    pub savgol_min_points: usize,
    pub savgol_polyorder: usize,
    pub time_unit: TimeUnit,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sampling_rate_hz: SAMPLING_RATE_HZ,
            window_lead_frames: WINDOW_LEAD_FRAMES,
            window_end_frames: WINDOW_END_FRAMES,
            fallback_window_start: FALLBACK_WINDOW_START,
            zero_cross_threshold: ZERO_CROSS_THRESHOLD,
            central: CentralStat::Mean,
            smooth: true,
            savgol_min_points: SAVGOL_MIN_POINTS,
            savgol_polyorder: SAVGOL_POLYORDER,
            time_unit: TimeUnit::Frames,
        }
    }
}

impl Params {
    /// Parse a (possibly partial) JSON parameter object; missing keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, PcError> {
        let params: Params =
            serde_json::from_str(text).map_err(|e| PcError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), PcError> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(PcError::InvalidParameter(format!(
                "sampling_rate_hz must be positive, got {}",
                self.sampling_rate_hz
            )));
        }
        if self.window_lead_frames < 0 {
            return Err(PcError::InvalidParameter(
                "window_lead_frames must be >= 0".into(),
            ));
        }
        if self.fallback_window_start > self.window_end_frames {
            return Err(PcError::InvalidParameter(format!(
                "fallback_window_start {} is after window_end_frames {}",
                self.fallback_window_start, self.window_end_frames
            )));
        }
        if !self.zero_cross_threshold.is_finite() {
            return Err(PcError::InvalidParameter(
                "zero_cross_threshold must be finite".into(),
            ));
        }
        for family in [SignalFamily::KinematicSequence, SignalFamily::JointAngle] {
            if let Some(window) = family.savgol_window() {
                savgol::check_window(window, self.savgol_polyorder)?;
                if self.savgol_min_points < window {
                    return Err(PcError::InvalidParameter(format!(
                        "savgol_min_points {} is below the {} sample window",
                        self.savgol_min_points, window
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn ms_per_frame(&self) -> f64 {
        1000.0 / self.sampling_rate_hz
    }
}
