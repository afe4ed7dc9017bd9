//! Inter-arrival interval aggregation.
//!
//! Full recompute over the event history. The output depends only on the
//! event timestamps (and the caller-supplied `last_updated`), so replaying
//! the same log any number of times yields the same buckets.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use crate::time::{interval_seconds, Daypart};
use crate::{ArrivalEvent, IntervalBucket};

/// Intervals between adjacent timestamps, each tagged with the later one.
///
/// Input need not be sorted.
pub fn intervals(timestamps: &[NaiveDateTime]) -> Vec<(NaiveDateTime, f64)> {
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    sorted
        .windows(2)
        .map(|pair| (pair[1], interval_seconds(&pair[0], &pair[1])))
        .collect()
}

/// Arithmetic mean of the adjacent intervals; `None` for fewer than two stamps.
pub fn mean_interval(timestamps: &[NaiveDateTime]) -> Option<f64> {
    let intervals = intervals(timestamps);
    if intervals.is_empty() {
        return None;
    }
    let sum: f64 = intervals.iter().map(|(_, secs)| secs).sum();
    Some(sum / intervals.len() as f64)
}

pub struct IntervalAggregator;

impl IntervalAggregator {
    /// Group intervals by (date, day-of-week, daypart) of the later event.
    ///
    /// Fewer than two events is a documented empty result, not an error.
    /// Buckets come out ordered by date, then daypart.
    pub fn recompute(events: &[ArrivalEvent], last_updated: NaiveDateTime) -> Vec<IntervalBucket> {
        let timestamps: Vec<NaiveDateTime> = events.iter().map(|ev| ev.timestamp).collect();

        // the date fixes the weekday, so (date, daypart) is the full key
        let mut groups: BTreeMap<(NaiveDate, Daypart), (f64, u32)> = BTreeMap::new();
        for (later, secs) in intervals(&timestamps) {
            let entry = groups
                .entry((later.date(), Daypart::of(&later)))
                .or_insert((0.0, 0));
            entry.0 += secs;
            entry.1 += 1;
        }

        groups
            .into_iter()
            .map(|((date, daypart), (sum, count))| IntervalBucket {
                analysis_date: date,
                day_of_week: date.weekday(),
                daypart,
                average_interval_seconds: sum / count as f64,
                detection_count: count,
                last_updated,
            })
            .collect()
    }
}
