//! Dashboard summary for the report CLI.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::fmt;

use crate::aggregate::mean_interval;
use crate::storage::ArrivalStore;

const DISPLAY_TIME_FORMAT: &str = "%-I:%M %p";

/// Snapshot of today's activity plus the latest forecast.
///
/// Every value is optional; a failed or empty read renders as `N/A`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub last_seen: Option<NaiveDateTime>,
    pub count_today: Option<usize>,
    /// Mean interval between today's arrivals, rounded up to whole minutes.
    pub avg_interval_minutes_today: Option<u64>,
    pub predicted_arrival: Option<NaiveDateTime>,
}

impl DashboardSummary {
    pub fn collect(store: &dyn ArrivalStore, now: NaiveDateTime) -> Self {
        let start = now.date().and_time(chrono::NaiveTime::MIN);
        let end = start + Duration::days(1);

        let today = match store.events_between(start, end) {
            Ok(events) => Some(events),
            Err(e) => {
                log::error!("{}", e);
                None
            }
        };
        let forecasts = match store.forecasts() {
            Ok(forecasts) => forecasts,
            Err(e) => {
                log::error!("{}", e);
                Vec::new()
            }
        };

        let timestamps: Vec<NaiveDateTime> = today
            .iter()
            .flatten()
            .map(|ev| ev.timestamp)
            .collect();

        let last_seen = timestamps
            .iter()
            .max()
            .copied()
            .or_else(|| forecasts.iter().map(|f| f.last_arrival_at).max());

        Self {
            last_seen,
            count_today: today.as_ref().map(Vec::len),
            avg_interval_minutes_today: mean_interval(&timestamps)
                .map(|secs| (secs / 60.0).ceil() as u64),
            predicted_arrival: forecasts
                .iter()
                .max_by(|a, b| a.generated_at.cmp(&b.generated_at))
                .map(|f| f.predicted_arrival_at),
        }
    }
}

fn time_or_na(ts: &Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format(DISPLAY_TIME_FORMAT).to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn value_or_na<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

impl fmt::Display for DashboardSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Last seen:          {}", time_or_na(&self.last_seen))?;
        writeln!(f, "Arrivals today:     {}", value_or_na(&self.count_today))?;
        let interval = self
            .avg_interval_minutes_today
            .map(|m| format!("{} min", m))
            .unwrap_or_else(|| "N/A".to_string());
        writeln!(f, "Average interval:   {}", interval)?;
        write!(f, "Predicted arrival:  {}", time_or_na(&self.predicted_arrival))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryArrivalStore;
    use crate::{ArrivalEvent, ForecastRecord, ObjectClass};
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn empty_store_renders_na() {
        let store = InMemoryArrivalStore::new();
        let summary = DashboardSummary::collect(&store, at(4, 12, 0, 0));
        assert_eq!(summary.count_today, Some(0));
        assert_eq!(summary.last_seen, None);
        let text = summary.to_string();
        assert!(text.contains("Last seen:          N/A"));
        assert!(text.contains("Predicted arrival:  N/A"));
    }

    #[test]
    fn today_stats_round_interval_up() {
        let mut store = InMemoryArrivalStore::new();
        for ts in [at(3, 22, 0, 0), at(4, 9, 0, 0), at(4, 9, 10, 1), at(4, 9, 20, 30)] {
            store
                .append_event(&ArrivalEvent::new(ts, ObjectClass::Bus, 0.9))
                .unwrap();
        }
        store
            .append_forecast(&ForecastRecord {
                generated_at: at(4, 9, 21, 0),
                last_arrival_at: at(4, 9, 20, 0),
                predicted_arrival_at: at(4, 14, 5, 0),
                interval_seconds: 600.0,
            })
            .unwrap();

        let summary = DashboardSummary::collect(&store, at(4, 12, 0, 0));
        assert_eq!(summary.count_today, Some(3));
        assert_eq!(summary.last_seen, Some(at(4, 9, 20, 30)));
        // (601 + 629) / 2 = 615 s
        assert_eq!(summary.avg_interval_minutes_today, Some(11));
        let text = summary.to_string();
        assert!(text.contains("9:20 AM"));
        assert!(text.contains("2:05 PM"));
        assert!(text.contains("11 min"));
    }

    #[test]
    fn last_seen_falls_back_to_forecast_basis() {
        let mut store = InMemoryArrivalStore::new();
        store
            .append_forecast(&ForecastRecord {
                generated_at: at(3, 23, 0, 0),
                last_arrival_at: at(3, 22, 40, 0),
                predicted_arrival_at: at(3, 23, 0, 0),
                interval_seconds: 1200.0,
            })
            .unwrap();
        let summary = DashboardSummary::collect(&store, at(4, 8, 0, 0));
        assert_eq!(summary.count_today, Some(0));
        assert_eq!(summary.last_seen, Some(at(3, 22, 40, 0)));
        assert_eq!(summary.avg_interval_minutes_today, None);
    }
}
