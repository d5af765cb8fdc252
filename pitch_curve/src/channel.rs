//! Signal channel access: the catalog of logical signals and the lookup of per-take
//! (frame, value) sequences from a sample store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::SignPolicy;
use crate::{Handedness, PcError, SignalCurve, Take, TakeId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn pick(self, row: &ChannelRow) -> Option<f64> {
        match self {
            Axis::X => row.x,
            Axis::Y => row.y,
            Axis::Z => row.z,
        }
    }
}

/// Maps a throwing side onto the store's segment name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentResolver {
    /// Side-independent segment (pelvis, torso).
    Fixed(&'static str),
    /// Segment named differently for right- and left-handed throwers.
    Sided {
        right: &'static str,
        left: &'static str,
    },
}

impl SegmentResolver {
    pub fn resolve(&self, handedness: Handedness) -> &'static str {
        match (self, handedness) {
            (SegmentResolver::Fixed(name), _) => name,
            (SegmentResolver::Sided { right, .. }, Handedness::Right) => right,
            (SegmentResolver::Sided { left, .. }, Handedness::Left) => left,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalFamily {
    /// Channels only consumed by the event detectors.
    EventInput,
    KinematicSequence,
    JointAngle,
    EnergyFlow,
}

impl SignalFamily {
    /// Savitzky–Golay window applied to grouped curves of this family.
    pub fn savgol_window(self) -> Option<usize> {
        match self {
            SignalFamily::EventInput => None,
            SignalFamily::KinematicSequence => Some(7),
            SignalFamily::JointAngle | SignalFamily::EnergyFlow => Some(11),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalDescriptor {
    pub label: &'static str,
    pub category: &'static str,
    pub segment: SegmentResolver,
    pub axis: Axis,
    pub sign: SignPolicy,
    pub family: SignalFamily,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    HandCgVelocity,
    ShoulderAngle,
    LeadKneePosition,
    LeadAnkleProxVelocity,
    LeadAnkleDistVelocity,
    PelvisAngularVelocity,
    TorsoAngularVelocity,
    ElbowAngularVelocity,
    ShoulderIrVelocity,
    ElbowFlexion,
    ShoulderEr,
    ShoulderAbduction,
    ShoulderHorizontalAbduction,
    FrontKneeFlexion,
    FrontKneeExtensionVelocity,
    ForwardTrunkTilt,
    LateralTrunkTilt,
    TrunkAngle,
    PelvisAngle,
    HipShoulderSeparation,
    ForearmPronationSupination,
    DistalArmSegmentPower,
    TrunkShoulderRotEnergyFlow,
    TrunkShoulderElevEnergyFlow,
    TrunkShoulderHorizAbdEnergyFlow,
    ArmRotEnergyFlow,
    ArmElevEnergyFlow,
    ArmHorizAbdEnergyFlow,
}

const THROWING_SHOULDER: SegmentResolver = SegmentResolver::Sided {
    right: "RT_SHOULDER",
    left: "LT_SHOULDER",
};
const THROWING_ELBOW_ANGLE: SegmentResolver = SegmentResolver::Sided {
    right: "RT_ELBOW_ANGLE",
    left: "LT_ELBOW_ANGLE",
};
const LEAD_FOOT: SegmentResolver = SegmentResolver::Sided {
    right: "LFT",
    left: "RFT",
};
const TRUNK_TO_ARM: SegmentResolver = SegmentResolver::Sided {
    right: "RTA_RAR",
    left: "RTA_LAR",
};
const ARM: SegmentResolver = SegmentResolver::Sided {
    right: "RAR",
    left: "LAR",
};

impl Signal {
    pub fn all() -> &'static [Signal] {
        use Signal::*;
        &[
            HandCgVelocity,
            ShoulderAngle,
            LeadKneePosition,
            LeadAnkleProxVelocity,
            LeadAnkleDistVelocity,
            PelvisAngularVelocity,
            TorsoAngularVelocity,
            ElbowAngularVelocity,
            ShoulderIrVelocity,
            ElbowFlexion,
            ShoulderEr,
            ShoulderAbduction,
            ShoulderHorizontalAbduction,
            FrontKneeFlexion,
            FrontKneeExtensionVelocity,
            ForwardTrunkTilt,
            LateralTrunkTilt,
            TrunkAngle,
            PelvisAngle,
            HipShoulderSeparation,
            ForearmPronationSupination,
            DistalArmSegmentPower,
            TrunkShoulderRotEnergyFlow,
            TrunkShoulderElevEnergyFlow,
            TrunkShoulderHorizAbdEnergyFlow,
            ArmRotEnergyFlow,
            ArmElevEnergyFlow,
            ArmHorizAbdEnergyFlow,
        ]
    }

    /// Signals plotted on the kinematic sequence view.
    pub fn kinematic_sequence() -> &'static [Signal] {
        &[
            Signal::PelvisAngularVelocity,
            Signal::TorsoAngularVelocity,
            Signal::ElbowAngularVelocity,
            Signal::ShoulderIrVelocity,
        ]
    }

    pub fn descriptor(self) -> SignalDescriptor {
        use Axis::{X, Y, Z};
        use SegmentResolver::{Fixed, Sided};
        use SignPolicy::{AlwaysNegate, DominantPeak, NegateLeft, NegateRight, Preserve};
        use SignalFamily::{EnergyFlow, EventInput, JointAngle, KinematicSequence};

        let (label, category, segment, axis, sign, family) = match self {
            Signal::HandCgVelocity => (
                "Hand CG Velocity",
                "KINETIC_KINEMATIC_CGVel",
                Sided { right: "RHA", left: "LHA" },
                X,
                Preserve,
                EventInput,
            ),
            Signal::ShoulderAngle => (
                "Shoulder Rotation Angle",
                "JOINT_ANGLES",
                THROWING_SHOULDER,
                Z,
                Preserve,
                EventInput,
            ),
            Signal::LeadKneePosition => (
                "Lead Knee Height",
                "KINETIC_KINEMATIC_ProxEndPos",
                Sided { right: "LSK", left: "RSK" },
                Z,
                Preserve,
                EventInput,
            ),
            Signal::LeadAnkleProxVelocity => (
                "Lead Ankle Proximal Velocity",
                "KINETIC_KINEMATIC_ProxEndVel",
                LEAD_FOOT,
                X,
                Preserve,
                EventInput,
            ),
            Signal::LeadAnkleDistVelocity => (
                "Lead Ankle Vertical Velocity",
                "KINETIC_KINEMATIC_DistEndVel",
                LEAD_FOOT,
                Z,
                Preserve,
                EventInput,
            ),
            Signal::PelvisAngularVelocity => (
                "Pelvis AV",
                "ORIGINAL",
                Fixed("PELVIS_ANGULAR_VELOCITY"),
                Z,
                NegateLeft,
                KinematicSequence,
            ),
            Signal::TorsoAngularVelocity => (
                "Torso AV",
                "ORIGINAL",
                Fixed("TORSO_ANGULAR_VELOCITY"),
                Z,
                NegateLeft,
                KinematicSequence,
            ),
            Signal::ElbowAngularVelocity => (
                "Elbow AV",
                "ORIGINAL",
                Sided {
                    right: "RT_ELBOW_ANGULAR_VELOCITY",
                    left: "LT_ELBOW_ANGULAR_VELOCITY",
                },
                X,
                AlwaysNegate,
                KinematicSequence,
            ),
            Signal::ShoulderIrVelocity => (
                "Shoulder IR AV",
                "ORIGINAL",
                Sided {
                    right: "RT_SHOULDER_ANGULAR_VELOCITY",
                    left: "LT_SHOULDER_ANGULAR_VELOCITY",
                },
                Z,
                NegateLeft,
                KinematicSequence,
            ),
            Signal::ElbowFlexion => (
                "Elbow Flexion",
                "ORIGINAL",
                THROWING_ELBOW_ANGLE,
                X,
                Preserve,
                JointAngle,
            ),
            Signal::ShoulderEr => (
                "Shoulder ER",
                "JOINT_ANGLES",
                THROWING_SHOULDER,
                Z,
                NegateRight,
                JointAngle,
            ),
            Signal::ShoulderAbduction => (
                "Shoulder Abduction",
                "JOINT_ANGLES",
                THROWING_SHOULDER,
                Y,
                Preserve,
                JointAngle,
            ),
            Signal::ShoulderHorizontalAbduction => (
                "Shoulder Horizontal Abduction",
                "JOINT_ANGLES",
                THROWING_SHOULDER,
                X,
                NegateRight,
                JointAngle,
            ),
            Signal::FrontKneeFlexion => (
                "Front Knee Flexion",
                "ORIGINAL",
                Sided {
                    right: "LT_KNEE_ANGLE",
                    left: "RT_KNEE_ANGLE",
                },
                X,
                Preserve,
                JointAngle,
            ),
            Signal::FrontKneeExtensionVelocity => (
                "Front Knee Extension Velocity",
                "ORIGINAL",
                Sided {
                    right: "LT_KNEE_ANGULAR_VELOCITY",
                    left: "RT_KNEE_ANGULAR_VELOCITY",
                },
                X,
                DominantPeak,
                JointAngle,
            ),
            Signal::ForwardTrunkTilt => (
                "Forward Trunk Tilt",
                "ORIGINAL",
                Fixed("TORSO_ANGLE"),
                X,
                Preserve,
                JointAngle,
            ),
            Signal::LateralTrunkTilt => (
                "Lateral Trunk Tilt",
                "ORIGINAL",
                Fixed("TORSO_ANGLE"),
                Y,
                Preserve,
                JointAngle,
            ),
            Signal::TrunkAngle => (
                "Trunk Angle",
                "ORIGINAL",
                Fixed("TORSO_ANGLE"),
                Z,
                Preserve,
                JointAngle,
            ),
            Signal::PelvisAngle => (
                "Pelvis Angle",
                "ORIGINAL",
                Fixed("PELVIS_ANGLE"),
                Z,
                Preserve,
                JointAngle,
            ),
            Signal::HipShoulderSeparation => (
                "Hip-Shoulder Separation",
                "ORIGINAL",
                Fixed("TORSO_PELVIS_ANGLE"),
                Z,
                Preserve,
                JointAngle,
            ),
            Signal::ForearmPronationSupination => (
                "Forearm Pronation/Supination",
                "ORIGINAL",
                THROWING_ELBOW_ANGLE,
                Z,
                Preserve,
                JointAngle,
            ),
            Signal::DistalArmSegmentPower => (
                "Distal Arm Segment Power",
                "SEGMENT_POWERS",
                Sided {
                    right: "RTA_DIST_R",
                    left: "RTA_DIST_L",
                },
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::TrunkShoulderRotEnergyFlow => (
                "Trunk-Shoulder Rotational Energy Flow",
                "JCS_STP_ROT",
                TRUNK_TO_ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::TrunkShoulderElevEnergyFlow => (
                "Trunk-Shoulder Elevation/Depression Energy Flow",
                "JCS_STP_ELEV",
                TRUNK_TO_ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::TrunkShoulderHorizAbdEnergyFlow => (
                "Trunk-Shoulder Horizontal Abd/Add Energy Flow",
                "JCS_STP_HORIZABD",
                TRUNK_TO_ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::ArmRotEnergyFlow => (
                "Arm Rotational Energy Flow",
                "JCS_STP_ROT",
                ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::ArmElevEnergyFlow => (
                "Arm Elevation/Depression Energy Flow",
                "JCS_STP_ELEV",
                ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
            Signal::ArmHorizAbdEnergyFlow => (
                "Arm Horizontal Abd/Add Energy Flow",
                "JCS_STP_HORIZABD",
                ARM,
                X,
                Preserve,
                EnergyFlow,
            ),
        };

        SignalDescriptor {
            label,
            category,
            segment,
            axis,
            sign,
            family,
        }
    }

    /// Kebab-case key used on the command line and in reports.
    pub fn key(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn from_key(key: &str) -> Result<Self, PcError> {
        let normalized = key.trim().to_ascii_lowercase().replace('_', "-");
        Signal::all()
            .iter()
            .copied()
            .find(|s| s.key() == normalized)
            .ok_or_else(|| PcError::UnknownSignal(key.to_string()))
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().label)
    }
}

/// One stored sample row for a (category, segment) channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelRow {
    pub take_id: TakeId,
    pub frame: i64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Flat sample record as exported from the motion-capture store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoreRow {
    pub take_id: TakeId,
    pub category: String,
    pub segment: String,
    pub frame: i64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Read access to per-frame channel samples.
///
/// Implementations return rows for the requested takes only. Store faults surface as an empty
/// result; callers treat that as "no data".
pub trait ChannelSource {
    fn rows(&self, take_ids: &BTreeSet<TakeId>, category: &str, segment: &str) -> Vec<ChannelRow>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    channels: BTreeMap<(String, String), Vec<ChannelRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I: IntoIterator<Item = StoreRow>>(rows: I) -> Self {
        let mut store = Self::new();
        for row in rows {
            store.insert(
                &row.category,
                &row.segment,
                ChannelRow {
                    take_id: row.take_id,
                    frame: row.frame,
                    x: row.x,
                    y: row.y,
                    z: row.z,
                },
            );
        }
        store
    }

    pub fn insert(&mut self, category: &str, segment: &str, row: ChannelRow) {
        self.channels
            .entry((category.to_string(), segment.to_string()))
            .or_default()
            .push(row);
    }

    /// Store one axis of a take curve, leaving the other axes empty.
    pub fn insert_curve(
        &mut self,
        category: &str,
        segment: &str,
        take_id: TakeId,
        axis: Axis,
        curve: &SignalCurve,
    ) {
        for (&frame, &value) in curve.frames.iter().zip(curve.values.iter()) {
            let mut row = ChannelRow {
                take_id,
                frame,
                x: None,
                y: None,
                z: None,
            };
            match axis {
                Axis::X => row.x = value,
                Axis::Y => row.y = value,
                Axis::Z => row.z = value,
            }
            self.insert(category, segment, row);
        }
    }

    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelSource for InMemoryStore {
    fn rows(&self, take_ids: &BTreeSet<TakeId>, category: &str, segment: &str) -> Vec<ChannelRow> {
        self.channels
            .get(&(category.to_string(), segment.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|row| take_ids.contains(&row.take_id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Several axes of one channel sharing a frame array.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MultiAxisCurve {
    pub frames: Vec<i64>,
    pub axes: Vec<Axis>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl MultiAxisCurve {
    pub fn axis(&self, axis: Axis) -> Option<SignalCurve> {
        let idx = self.axes.iter().position(|a| *a == axis)?;
        Some(SignalCurve::new(self.frames.clone(), self.values[idx].clone()))
    }
}

/// Fetch several axes of a channel for the given takes.
///
/// Takes without a recognized handedness are skipped; an empty take list yields an empty map.
pub fn fetch_axes<S: ChannelSource + ?Sized>(
    source: &S,
    takes: &[Take],
    category: &str,
    segment: SegmentResolver,
    axes: &[Axis],
) -> BTreeMap<TakeId, MultiAxisCurve> {
    let mut out = BTreeMap::new();
    if takes.is_empty() || axes.is_empty() {
        return out;
    }

    let mut by_segment: BTreeMap<&'static str, BTreeSet<TakeId>> = BTreeMap::new();
    for take in takes {
        if let Some(handedness) = take.handedness {
            by_segment
                .entry(segment.resolve(handedness))
                .or_default()
                .insert(take.id);
        }
    }

    for (segment_name, ids) in by_segment {
        let mut rows = source.rows(&ids, category, segment_name);
        rows.sort_by_key(|row| (row.take_id, row.frame));
        for row in rows {
            let entry = out.entry(row.take_id).or_insert_with(|| MultiAxisCurve {
                frames: Vec::new(),
                axes: axes.to_vec(),
                values: vec![Vec::new(); axes.len()],
            });
            entry.frames.push(row.frame);
            for (slot, axis) in entry.values.iter_mut().zip(axes.iter()) {
                slot.push(axis.pick(&row));
            }
        }
    }

    debug!(
        category,
        axes = axes.len(),
        takes = out.len(),
        "fetched channel"
    );
    out
}

/// Fetch one axis of a channel for the given takes.
pub fn fetch_signal<S: ChannelSource + ?Sized>(
    source: &S,
    takes: &[Take],
    category: &str,
    segment: SegmentResolver,
    axis: Axis,
) -> BTreeMap<TakeId, SignalCurve> {
    fetch_axes(source, takes, category, segment, &[axis])
        .into_iter()
        .filter_map(|(id, curve)| curve.axis(axis).map(|c| (id, c)))
        .collect()
}

impl Signal {
    pub fn fetch<S: ChannelSource + ?Sized>(
        self,
        source: &S,
        takes: &[Take],
    ) -> BTreeMap<TakeId, SignalCurve> {
        let desc = self.descriptor();
        fetch_signal(source, takes, desc.category, desc.segment, desc.axis)
    }
}
