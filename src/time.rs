//! Timestamp contract and calendar slots.
//!
//! Every timestamp that crosses the store boundary goes through
//! [`parse_timestamp`] / [`format_timestamp`], so all backends agree on one
//! closed set of accepted formats.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{PipelineError, PipelineResult};

/// Storage format. Fixed-width so text ordering equals chronological ordering.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a timestamp in one of the accepted formats.
///
/// Accepts a space or `T` separator, optional fractional seconds and an
/// optional UTC suffix (`Z`, `+00:00`, `+0000`, ` UTC`). Any other offset is
/// rejected rather than silently shifted.
pub fn parse_timestamp(raw: &str) -> PipelineResult<NaiveDateTime> {
    static UTC_SUFFIX_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = UTC_SUFFIX_RE
        .get_or_init(|| regex::Regex::new(r"(?i)(?:\s*utc|z|\+00:?00)$").unwrap());

    let trimmed = raw.trim();
    let naive = re.replace(trimmed, "");
    for fmt in ACCEPTED_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&naive, fmt) {
            return Ok(ts);
        }
    }
    Err(PipelineError::MalformedTimestamp(raw.to_string()))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Seconds elapsed from `earlier` to `later`, with sub-second precision.
pub fn interval_seconds(earlier: &NaiveDateTime, later: &NaiveDateTime) -> f64 {
    let delta = *later - *earlier;
    delta
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| delta.num_seconds() as f64)
}

/// `ts + seconds`, rounded to the millisecond.
///
/// Fails when the offset is not finite or the result leaves chrono's range.
pub fn add_seconds(ts: &NaiveDateTime, seconds: f64) -> PipelineResult<NaiveDateTime> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(PipelineError::IntervalOutOfRange(seconds));
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|offset| ts.checked_add_signed(offset))
        .ok_or(PipelineError::IntervalOutOfRange(seconds))
}

/// Convert a configured std duration, saturating at the largest span chrono holds.
pub fn saturating_span(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

// -------------------- Dayparts --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Daypart {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl Daypart {
    /// `[5,12)` Morning, `[12,17)` Afternoon, `[17,21)` Evening, else Night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Daypart::Morning,
            12..=16 => Daypart::Afternoon,
            17..=20 => Daypart::Evening,
            _ => Daypart::Night,
        }
    }

    pub fn of(ts: &NaiveDateTime) -> Self {
        Self::from_hour(ts.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Daypart::Morning => "Morning",
            Daypart::Afternoon => "Afternoon",
            Daypart::Evening => "Evening",
            Daypart::Night => "Night",
        }
    }
}

impl fmt::Display for Daypart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Daypart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Morning" => Ok(Daypart::Morning),
            "Afternoon" => Ok(Daypart::Afternoon),
            "Evening" => Ok(Daypart::Evening),
            "Night" => Ok(Daypart::Night),
            other => Err(format!("unknown daypart {:?}", other)),
        }
    }
}

/// Full English day name ("Monday"), the form stored in `daily_analysis`.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Recurring weekly slot an instant falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeSlot {
    pub day_of_week: Weekday,
    pub daypart: Daypart,
}

impl TimeSlot {
    pub fn of(ts: &NaiveDateTime) -> Self {
        Self {
            day_of_week: ts.weekday(),
            daypart: Daypart::of(ts),
        }
    }

    pub fn day_name(&self) -> &'static str {
        weekday_name(self.day_of_week)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.day_name(), self.daypart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn accepts_closed_set_of_formats() {
        let expected = at(9, 10, 0);
        for raw in [
            "2024-03-04 09:10:00",
            "2024-03-04T09:10:00",
            "2024-03-04 09:10:00.000",
            "2024-03-04T09:10:00.000000Z",
            "2024-03-04T09:10:00+00:00",
            "2024-03-04 09:10:00 UTC",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn keeps_sub_second_precision() {
        let ts = parse_timestamp("2024-03-04T09:10:00.250").unwrap();
        assert_eq!(ts.nanosecond() / 1_000_000, 250);
    }

    #[test]
    fn rejects_other_offsets_and_garbage() {
        for raw in ["2024-03-04T09:10:00+02:00", "yesterday", "2024-03-04", ""] {
            assert!(matches!(
                parse_timestamp(raw),
                Err(PipelineError::MalformedTimestamp(_))
            ));
        }
    }

    #[test]
    fn storage_format_round_trips_and_sorts() {
        let a = parse_timestamp("2024-03-04 09:10:00.5").unwrap();
        let b = at(10, 0, 0);
        assert_eq!(parse_timestamp(&format_timestamp(&a)).unwrap(), a);
        assert!(format_timestamp(&a) < format_timestamp(&b));
    }

    #[test]
    fn daypart_boundaries() {
        assert_eq!(Daypart::from_hour(4), Daypart::Night);
        assert_eq!(Daypart::from_hour(5), Daypart::Morning);
        assert_eq!(Daypart::from_hour(11), Daypart::Morning);
        assert_eq!(Daypart::from_hour(12), Daypart::Afternoon);
        assert_eq!(Daypart::from_hour(17), Daypart::Evening);
        assert_eq!(Daypart::from_hour(20), Daypart::Evening);
        assert_eq!(Daypart::from_hour(21), Daypart::Night);
        assert_eq!(Daypart::from_hour(0), Daypart::Night);
    }

    #[test]
    fn slot_uses_full_day_names() {
        let slot = TimeSlot::of(&at(14, 0, 0));
        assert_eq!(slot.day_name(), "Monday");
        assert_eq!(slot.to_string(), "Monday Afternoon");
    }

    #[test]
    fn interval_and_offset_arithmetic() {
        assert_eq!(interval_seconds(&at(9, 0, 0), &at(9, 10, 0)), 600.0);
        assert_eq!(add_seconds(&at(14, 0, 0), 720.0).unwrap(), at(14, 12, 0));
    }

    #[test]
    fn offsets_beyond_calendar_range_are_errors() {
        for seconds in [1e300, f64::INFINITY, f64::NAN, 1e15] {
            assert!(matches!(
                add_seconds(&at(14, 0, 0), seconds),
                Err(PipelineError::IntervalOutOfRange(_))
            ));
        }
    }

    #[test]
    fn oversized_std_durations_saturate() {
        let huge = std::time::Duration::from_secs(u64::MAX);
        assert_eq!(saturating_span(huge), Duration::MAX);
        assert_eq!(
            saturating_span(std::time::Duration::from_secs(30)),
            Duration::seconds(30)
        );
    }
}
