//! Next-arrival forecast.
//!
//! A naive persistence-weighted average: the most recent bucket for the
//! current (day-of-week, daypart), else the mean over every bucket.

use chrono::NaiveDateTime;

use crate::error::{PipelineError, PipelineResult};
use crate::time::{add_seconds, TimeSlot};
use crate::{ArrivalEvent, ForecastRecord, IntervalBucket};

/// Bucket queries the forecaster needs from a store.
pub trait BucketLookup {
    /// Bucket for the slot with the most recent analysis date.
    fn latest_for_slot(&self, slot: TimeSlot) -> PipelineResult<Option<IntervalBucket>>;

    /// Mean of `average_interval_seconds` across all buckets.
    fn global_mean_interval(&self) -> PipelineResult<Option<f64>>;
}

impl BucketLookup for [IntervalBucket] {
    fn latest_for_slot(&self, slot: TimeSlot) -> PipelineResult<Option<IntervalBucket>> {
        Ok(self
            .iter()
            .filter(|b| b.slot() == slot)
            .max_by_key(|b| b.analysis_date)
            .cloned())
    }

    fn global_mean_interval(&self) -> PipelineResult<Option<f64>> {
        if self.is_empty() {
            return Ok(None);
        }
        let sum: f64 = self.iter().map(|b| b.average_interval_seconds).sum();
        Ok(Some(sum / self.len() as f64))
    }
}

/// Where the interval used for a forecast came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntervalSource {
    Slot(TimeSlot),
    GlobalFallback,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Forecast {
    pub record: ForecastRecord,
    pub source: IntervalSource,
}

pub struct Forecaster;

impl Forecaster {
    pub fn choose_interval<L>(slot: TimeSlot, lookup: &L) -> PipelineResult<(f64, IntervalSource)>
    where
        L: BucketLookup + ?Sized,
    {
        if let Some(bucket) = lookup.latest_for_slot(slot)? {
            return Ok((bucket.average_interval_seconds, IntervalSource::Slot(slot)));
        }
        log::info!("no interval history for {}, using overall average", slot);
        match lookup.global_mean_interval()? {
            Some(mean) => Ok((mean, IntervalSource::GlobalFallback)),
            None => Err(PipelineError::InsufficientHistory(
                "no interval buckets to forecast from",
            )),
        }
    }

    /// Predict the next arrival as `last_event + chosen interval`.
    pub fn forecast<L>(
        now: NaiveDateTime,
        last_event: &ArrivalEvent,
        lookup: &L,
    ) -> PipelineResult<Forecast>
    where
        L: BucketLookup + ?Sized,
    {
        let slot = TimeSlot::of(&now);
        let (interval_seconds, source) = Self::choose_interval(slot, lookup)?;
        let predicted_arrival_at = add_seconds(&last_event.timestamp, interval_seconds)?;
        Ok(Forecast {
            record: ForecastRecord {
                generated_at: now,
                last_arrival_at: last_event.timestamp,
                predicted_arrival_at,
                interval_seconds,
            },
            source,
        })
    }
}
