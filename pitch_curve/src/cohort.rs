//! Cohort selection and median event markers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::events::{CohortEvents, EventKind};
use crate::{Take, TakeId};

/// Median of frame values, truncated toward zero.
pub fn median_frame<I: IntoIterator<Item = i64>>(frames: I) -> Option<i64> {
    let mut sorted: Vec<i64> = frames.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    };
    Some(median.trunc() as i64)
}

/// Median event times relative to BR for a cohort.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMarkers {
    pub pkh: Option<i64>,
    pub fp: Option<i64>,
    pub mer: Option<i64>,
}

impl EventMarkers {
    pub fn from_events(events: &CohortEvents) -> Self {
        let median_of = |kind: EventKind| median_frame(events.relative_frames(kind).into_values());
        Self {
            pkh: median_of(EventKind::PeakKneeHeight),
            fp: median_of(EventKind::FootPlantZeroCross),
            mer: median_of(EventKind::MaxExternalRotation),
        }
    }
}

/// Which takes of the catalog enter a cohort.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CohortFilter {
    /// Session dates to keep; `None` keeps every date.
    pub dates: Option<BTreeSet<NaiveDate>>,
    pub velocity_min: Option<f64>,
    pub velocity_max: Option<f64>,
    pub excluded: BTreeSet<TakeId>,
}

impl CohortFilter {
    pub fn accepts(&self, take: &Take) -> bool {
        if self.excluded.contains(&take.id) {
            return false;
        }
        if let Some(dates) = &self.dates {
            if !dates.contains(&take.session_date) {
                return false;
            }
        }
        if self.velocity_min.is_none() && self.velocity_max.is_none() {
            return true;
        }
        let Some(velocity) = take.pitch_velocity_mph.filter(|v| v.is_finite()) else {
            return false;
        };
        self.velocity_min.map_or(true, |min| velocity >= min)
            && self.velocity_max.map_or(true, |max| velocity <= max)
    }

    pub fn select(&self, takes: &[Take]) -> Vec<Take> {
        takes.iter().filter(|t| self.accepts(t)).cloned().collect()
    }
}

/// Number takes 1.. within each session date, ordered by take id.
pub fn assign_pitch_order(takes: &[Take]) -> BTreeMap<TakeId, u32> {
    let mut by_date: BTreeMap<NaiveDate, Vec<TakeId>> = BTreeMap::new();
    for take in takes {
        by_date.entry(take.session_date).or_default().push(take.id);
    }
    let mut out = BTreeMap::new();
    for (_, mut ids) in by_date {
        ids.sort();
        for (idx, id) in ids.into_iter().enumerate() {
            out.insert(id, idx as u32 + 1);
        }
    }
    out
}

/// Lowest and highest recorded pitch velocity.
pub fn velocity_bounds(takes: &[Take]) -> Option<(f64, f64)> {
    takes
        .iter()
        .filter_map(|t| t.pitch_velocity_mph)
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handedness;

    fn take(id: i64, day: u32, mph: Option<f64>) -> Take {
        Take {
            id: TakeId(id),
            handedness: Some(Handedness::Right),
            session_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            pitch_velocity_mph: mph,
        }
    }

    #[test]
    fn test_median_frame_truncates_toward_zero() {
        assert_eq!(median_frame(vec![-25, -22]), Some(-23));
        assert_eq!(median_frame(vec![3, 4]), Some(3));
        assert_eq!(median_frame(vec![5, 1, 9]), Some(5));
        assert_eq!(median_frame(Vec::<i64>::new()), None);
    }

    #[test]
    fn test_markers_from_events() {
        let mut events = CohortEvents::default();
        events.br.insert(TakeId(1), 100);
        events.br.insert(TakeId(2), 120);
        events.pkh.insert(TakeId(1), 60);
        events.pkh.insert(TakeId(2), 80);
        events.fp_zero_cross.insert(TakeId(1), 75);
        let markers = EventMarkers::from_events(&events);
        assert_eq!(markers.pkh, Some(-40));
        assert_eq!(markers.fp, Some(-25));
        assert_eq!(markers.mer, None);
    }

    #[test]
    fn test_filter_select() {
        let takes = vec![
            take(1, 1, Some(88.0)),
            take(2, 1, Some(92.5)),
            take(3, 2, None),
            take(4, 3, Some(90.0)),
        ];

        let all = CohortFilter::default().select(&takes);
        assert_eq!(all.len(), 4);

        let band = CohortFilter {
            velocity_min: Some(88.0),
            velocity_max: Some(90.0),
            ..CohortFilter::default()
        };
        let ids: Vec<_> = band.select(&takes).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 4]);

        let mut dates = BTreeSet::new();
        dates.insert(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let by_date = CohortFilter {
            dates: Some(dates),
            excluded: [TakeId(2)].into_iter().collect(),
            ..CohortFilter::default()
        };
        let ids: Vec<_> = by_date.select(&takes).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_pitch_order_per_date() {
        let takes = vec![take(7, 2, None), take(3, 1, None), take(5, 2, None), take(1, 1, None)];
        let order = assign_pitch_order(&takes);
        assert_eq!(order[&TakeId(1)], 1);
        assert_eq!(order[&TakeId(3)], 2);
        assert_eq!(order[&TakeId(5)], 1);
        assert_eq!(order[&TakeId(7)], 2);
    }

    #[test]
    fn test_velocity_bounds() {
        let takes = vec![take(1, 1, Some(88.0)), take(2, 1, None), take(3, 1, Some(94.0))];
        assert_eq!(velocity_bounds(&takes), Some((88.0, 94.0)));
        assert_eq!(velocity_bounds(&[take(1, 1, None)]), None);
    }
}
