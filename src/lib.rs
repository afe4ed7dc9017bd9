//! Arrival tracking and forecasting
//!
//! This crate turns per-frame object detections from an external detector
//! into deduplicated arrival events, aggregates the inter-arrival intervals
//! by day-of-week and daypart, and forecasts the next arrival.
//!
//! # Architecture
//!
//! The pipeline is a single-writer stream processor:
//!
//! 1. **Arrival policy**: either the [`LineCrossingTracker`] (right-to-left
//!    crossing of a reference line, at most once per tracking id) or the
//!    [`EventDeduplicator`] (cooldown timer) decides whether a frame is an arrival.
//! 2. **Event log**: accepted arrivals are appended to an [`ArrivalStore`].
//! 3. **Aggregation**: [`IntervalAggregator`] recomputes bucketed interval
//!    statistics from the full event log. Recompute is idempotent.
//! 4. **Forecast**: [`Forecaster`] projects the next arrival from the latest
//!    event and the bucket matching the current slot, or a global fallback.
//!
//! # Module Structure
//!
//! - `detect`: detector contract (Detection, FrameDetections, DetectorSource)
//! - `tracker` / `dedup`: arrival policies
//! - `aggregate` / `forecast`: interval statistics and prediction
//! - `storage`: durable store trait with SQLite and in-memory backends
//! - `pipeline`: wiring of the above, with failure isolation for I/O
//! - Core types: ArrivalEvent, IntervalBucket, ForecastRecord

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod forecast;
pub mod pipeline;
pub mod report;
pub mod snapshot;
pub mod storage;
pub mod time;
pub mod tracker;

pub use aggregate::IntervalAggregator;
pub use dedup::{DedupSettings, EventDeduplicator};
pub use detect::{
    BoundingBox, Detection, DetectorSource, FrameDetections, JsonLinesSource, ObjectClass,
    ScriptedSource, SnapshotSource,
};
pub use error::{PipelineError, PipelineResult};
pub use forecast::{BucketLookup, Forecast, Forecaster, IntervalSource};
pub use pipeline::{
    ArrivalMode, ArrivalPipeline, FrameOutcome, PipelineSettings, RunSummary, SharedPipeline,
};
pub use report::DashboardSummary;
pub use snapshot::SnapshotStore;
pub use storage::{ArrivalStore, InMemoryArrivalStore, SqliteArrivalStore};
pub use time::{Daypart, TimeSlot};
pub use tracker::{LineCrossingTracker, TrackState, TrackedObject, TrackerSettings};

pub fn shared_memory_uri() -> String {
    format!(
        "file:arrival_forecast_{:x}?mode=memory&cache=shared",
        rand::random::<u64>()
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

// -------------------- Arrival Events --------------------

/// A logged arrival. Append-only; ordered by timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrivalEvent {
    pub timestamp: NaiveDateTime,
    pub class: ObjectClass,
    pub confidence: f32,
    pub image_path: Option<String>,
    pub tracking_id: Option<u64>,
}

impl ArrivalEvent {
    pub fn new(timestamp: NaiveDateTime, class: ObjectClass, confidence: f32) -> Self {
        Self {
            timestamp,
            class,
            confidence,
            image_path: None,
            tracking_id: None,
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: Option<u64>) -> Self {
        self.tracking_id = tracking_id;
        self
    }

    pub fn with_image_path(mut self, image_path: Option<String>) -> Self {
        self.image_path = image_path;
        self
    }
}

// -------------------- Interval Buckets --------------------

/// Unique key of a `daily_analysis` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub analysis_date: NaiveDate,
    pub day_of_week: Weekday,
    pub daypart: Daypart,
}

impl BucketKey {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            day_of_week: self.day_of_week,
            daypart: self.daypart,
        }
    }
}

/// Mean inter-arrival interval for one (date, day-of-week, daypart).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalBucket {
    pub analysis_date: NaiveDate,
    pub day_of_week: Weekday,
    pub daypart: Daypart,
    pub average_interval_seconds: f64,
    /// Number of intervals in the mean (pairs whose later event falls here).
    pub detection_count: u32,
    pub last_updated: NaiveDateTime,
}

impl IntervalBucket {
    pub fn key(&self) -> BucketKey {
        BucketKey {
            analysis_date: self.analysis_date,
            day_of_week: self.day_of_week,
            daypart: self.daypart,
        }
    }

    pub fn slot(&self) -> TimeSlot {
        self.key().slot()
    }
}

// -------------------- Forecasts --------------------

/// One forecast run. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub generated_at: NaiveDateTime,
    pub last_arrival_at: NaiveDateTime,
    pub predicted_arrival_at: NaiveDateTime,
    /// Bucket-specific or global-fallback interval, verbatim.
    pub interval_seconds: f64,
}
