//! End-to-end cohort run: events, window, normalized curves, aggregates and summaries.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{aggregate_curves, CohortAggregate};
use crate::channel::{fetch_axes, Axis, ChannelSource, SegmentResolver, Signal, SignalFamily};
use crate::cohort::{assign_pitch_order, EventMarkers};
use crate::events::{detect_events, fetch_event_inputs, CohortEvents, CurveMap, EventKind};
use crate::normalize::{cohort_window, normalize_signal, PlotWindow, RelativeCurve};
use crate::summary::{
    grouped_joint_summary, grouped_kinematic_peak, peak_segment_power, take_joint_summary,
    take_kinematic_peak, JointSummary, KinematicPeak,
};
use crate::{Handedness, Params, PcError, Take, TakeId, TimeUnit};

/// Results for one plotted signal. Curves and aggregates are in the run's time unit; peak and
/// summary frames stay in relative frames.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignalReport {
    pub signal: Signal,
    pub label: String,
    pub family: SignalFamily,
    pub curves: BTreeMap<TakeId, RelativeCurve>,
    pub by_date: BTreeMap<NaiveDate, CohortAggregate>,
    pub cohort: CohortAggregate,
    pub kinematic_peaks: Vec<KinematicPeak>,
    pub joint_summaries: Vec<JointSummary>,
    pub segment_power_peaks: BTreeMap<TakeId, f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CohortReport {
    pub params: Params,
    pub takes: Vec<Take>,
    pub pitch_order: BTreeMap<TakeId, u32>,
    pub events: CohortEvents,
    pub markers: EventMarkers,
    pub window: PlotWindow,
    pub signals: Vec<SignalReport>,
}

/// Fetch each channel once, then split out the requested axes per signal.
fn fetch_signal_curves<S: ChannelSource + ?Sized>(
    source: &S,
    takes: &[Take],
    signals: &[Signal],
) -> BTreeMap<Signal, CurveMap> {
    let mut groups: Vec<((&'static str, SegmentResolver), Vec<Axis>)> = Vec::new();
    for signal in signals {
        let desc = signal.descriptor();
        let key = (desc.category, desc.segment);
        let found = groups.iter().position(|(k, _)| *k == key);
        match found {
            Some(idx) => {
                let axes = &mut groups[idx].1;
                if !axes.contains(&desc.axis) {
                    axes.push(desc.axis);
                }
            }
            None => groups.push((key, vec![desc.axis])),
        }
    }

    let mut fetched = Vec::with_capacity(groups.len());
    for ((category, segment), axes) in &groups {
        let curves = fetch_axes(source, takes, category, *segment, axes);
        fetched.push(((*category, *segment), curves));
    }

    let mut out = BTreeMap::new();
    for signal in signals {
        let desc = signal.descriptor();
        let key = (desc.category, desc.segment);
        let curves: CurveMap = fetched
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, multi)| {
                multi
                    .iter()
                    .filter_map(|(id, curve)| curve.axis(desc.axis).map(|c| (*id, c)))
                    .collect()
            })
            .unwrap_or_default();
        out.insert(*signal, curves);
    }
    out
}

fn aggregate_family(
    curves: &[&RelativeCurve],
    family: SignalFamily,
    params: &Params,
) -> Result<CohortAggregate, PcError> {
    let aggregate = aggregate_curves(curves.iter().copied(), params.central);
    match family.savgol_window() {
        Some(window) if params.smooth => {
            aggregate.smoothed(window, params.savgol_polyorder, params.savgol_min_points)
        }
        _ => Ok(aggregate),
    }
}

/// Run the whole pipeline for `takes` and the requested `signals`.
pub fn run_cohort<S: ChannelSource + ?Sized>(
    source: &S,
    takes: &[Take],
    signals: &[Signal],
    params: &Params,
) -> Result<CohortReport, PcError> {
    params.validate()?;

    let handedness: BTreeMap<TakeId, Handedness> = takes
        .iter()
        .filter_map(|t| t.handedness.map(|h| (t.id, h)))
        .collect();
    let by_id: BTreeMap<TakeId, &Take> = takes.iter().map(|t| (t.id, t)).collect();

    let inputs = fetch_event_inputs(source, takes);
    let events = detect_events(&inputs, &handedness, params);
    let markers = EventMarkers::from_events(&events);
    let window = cohort_window(&events.relative_frames(EventKind::FootPlantZeroCross), params);
    let mer_rel = events.relative_frames(EventKind::MaxExternalRotation);
    let fp_rel = events.relative_frames(EventKind::FootPlantZeroCross);
    let ms_per_frame = params.ms_per_frame();

    let raw = fetch_signal_curves(source, takes, signals);
    let mut reports = Vec::with_capacity(signals.len());
    for signal in signals {
        let desc = signal.descriptor();
        let empty = CurveMap::new();
        let curves = raw.get(signal).unwrap_or(&empty);
        let normalized = normalize_signal(curves, &events.br, &handedness, &window, desc.sign);

        let mut members_by_date: BTreeMap<NaiveDate, Vec<(&Take, &RelativeCurve)>> =
            BTreeMap::new();
        for (id, curve) in &normalized {
            if let Some(take) = by_id.get(id) {
                members_by_date
                    .entry(take.session_date)
                    .or_default()
                    .push((*take, curve));
            }
        }

        let mut by_date = BTreeMap::new();
        let mut kinematic_peaks = Vec::new();
        let mut joint_summaries = Vec::new();
        for (date, members) in &members_by_date {
            let member_curves: Vec<&RelativeCurve> = members.iter().map(|(_, c)| *c).collect();
            let aggregate = aggregate_family(&member_curves, desc.family, params)?;

            match desc.family {
                SignalFamily::KinematicSequence => {
                    for (take, curve) in members {
                        kinematic_peaks.extend(take_kinematic_peak(
                            *signal,
                            take,
                            curve,
                            fp_rel.get(&take.id).copied(),
                            ms_per_frame,
                        ));
                    }
                    kinematic_peaks.extend(grouped_kinematic_peak(
                        *signal,
                        *date,
                        &aggregate,
                        markers.fp,
                        ms_per_frame,
                    ));
                }
                SignalFamily::JointAngle => {
                    for (take, curve) in members {
                        joint_summaries.extend(take_joint_summary(
                            *signal,
                            take,
                            curve,
                            &markers,
                            mer_rel.get(&take.id).copied(),
                        ));
                    }
                    joint_summaries.extend(grouped_joint_summary(
                        *signal, *date, &aggregate, members, &markers,
                    ));
                }
                SignalFamily::EnergyFlow | SignalFamily::EventInput => {}
            }
            by_date.insert(*date, aggregate);
        }

        let all_curves: Vec<&RelativeCurve> = normalized.values().collect();
        let cohort = aggregate_family(&all_curves, desc.family, params)?;
        let segment_power_peaks = if *signal == Signal::DistalArmSegmentPower {
            peak_segment_power(&normalized, markers.fp)
        } else {
            BTreeMap::new()
        };

        debug!(
            signal = %signal,
            takes = normalized.len(),
            dates = by_date.len(),
            points = cohort.len(),
            smoothed = cohort.smoothed,
            "aggregated signal"
        );

        let (curves, by_date, cohort) = match params.time_unit {
            TimeUnit::Frames => (normalized, by_date, cohort),
            unit => (
                normalized
                    .into_iter()
                    .map(|(id, c)| (id, c.to_unit(unit, params.sampling_rate_hz)))
                    .collect(),
                by_date
                    .into_iter()
                    .map(|(d, a)| (d, a.to_unit(unit, params.sampling_rate_hz)))
                    .collect(),
                cohort.to_unit(unit, params.sampling_rate_hz),
            ),
        };

        reports.push(SignalReport {
            signal: *signal,
            label: desc.label.to_string(),
            family: desc.family,
            curves,
            by_date,
            cohort,
            kinematic_peaks,
            joint_summaries,
            segment_power_peaks,
        });
    }

    Ok(CohortReport {
        params: params.clone(),
        takes: takes.to_vec(),
        pitch_order: assign_pitch_order(takes),
        events,
        markers,
        window,
        signals: reports,
    })
}
