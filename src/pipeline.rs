//! Frame-to-forecast wiring.
//!
//! [`ArrivalPipeline`] owns the arrival policy, the store and the snapshot
//! writer. Frame processing never fails: store and snapshot errors are
//! logged and the frame is still counted.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregate::IntervalAggregator;
use crate::dedup::{DedupSettings, EventDeduplicator};
use crate::detect::{Detection, DetectorSource, FrameDetections};
use crate::error::{PipelineError, PipelineResult};
use crate::forecast::{Forecast, Forecaster};
use crate::snapshot::SnapshotStore;
use crate::storage::ArrivalStore;
use crate::time::saturating_span;
use crate::tracker::{LineCrossingTracker, TrackerSettings};
use crate::ArrivalEvent;

pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 250;

pub type SharedPipeline = Arc<Mutex<ArrivalPipeline>>;

/// How arrivals are decided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalMode {
    /// Right-to-left crossing of the reference line, once per tracking id.
    #[default]
    Crossing,
    /// Any confident detection, at most once per cooldown window.
    Cooldown,
}

impl ArrivalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalMode::Crossing => "crossing",
            ArrivalMode::Cooldown => "cooldown",
        }
    }
}

impl fmt::Display for ArrivalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArrivalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossing" => Ok(ArrivalMode::Crossing),
            "cooldown" => Ok(ArrivalMode::Cooldown),
            other => Err(format!("unknown arrival mode {:?}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub mode: ArrivalMode,
    pub tracker: TrackerSettings,
    pub dedup: DedupSettings,
    /// Frames closer together than this (by frame timestamp) are skipped.
    pub min_frame_interval: std::time::Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: ArrivalMode::default(),
            tracker: TrackerSettings::default(),
            dedup: DedupSettings::default(),
            min_frame_interval: std::time::Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
        }
    }
}

enum ArrivalPolicy {
    Crossing(LineCrossingTracker),
    Cooldown(EventDeduplicator),
}

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Arrived within `min_frame_interval` of the last processed frame.
    Skipped,
    /// The detector produced no observations.
    NoObservations { evicted: Vec<u64> },
    Processed {
        arrivals: Vec<ArrivalEvent>,
        evicted: Vec<u64>,
    },
}

impl FrameOutcome {
    pub fn arrivals(&self) -> &[ArrivalEvent] {
        match self {
            FrameOutcome::Processed { arrivals, .. } => arrivals,
            _ => &[],
        }
    }
}

pub struct ArrivalPipeline {
    store: Box<dyn ArrivalStore + Send>,
    snapshots: Option<SnapshotStore>,
    policy: ArrivalPolicy,
    min_frame_interval: Duration,
    last_processed: Option<NaiveDateTime>,
}

impl ArrivalPipeline {
    pub fn new(settings: &PipelineSettings, store: Box<dyn ArrivalStore + Send>) -> Self {
        let policy = match settings.mode {
            ArrivalMode::Crossing => {
                ArrivalPolicy::Crossing(LineCrossingTracker::new(&settings.tracker))
            }
            ArrivalMode::Cooldown => ArrivalPolicy::Cooldown(EventDeduplicator::new(&settings.dedup)),
        };
        Self {
            store,
            snapshots: None,
            policy,
            min_frame_interval: saturating_span(settings.min_frame_interval),
            last_processed: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn into_shared(self) -> SharedPipeline {
        Arc::new(Mutex::new(self))
    }

    pub fn mode(&self) -> ArrivalMode {
        match self.policy {
            ArrivalPolicy::Crossing(_) => ArrivalMode::Crossing,
            ArrivalPolicy::Cooldown(_) => ArrivalMode::Cooldown,
        }
    }

    pub fn store(&self) -> &dyn ArrivalStore {
        self.store.as_ref()
    }

    pub fn tracker(&self) -> Option<&LineCrossingTracker> {
        match &self.policy {
            ArrivalPolicy::Crossing(tracker) => Some(tracker),
            ArrivalPolicy::Cooldown(_) => None,
        }
    }

    pub fn process_frame(&mut self, frame: &FrameDetections) -> FrameOutcome {
        if let Some(last) = self.last_processed {
            let elapsed = frame.timestamp - last;
            if elapsed >= Duration::zero() && elapsed < self.min_frame_interval {
                return FrameOutcome::Skipped;
            }
        }
        self.last_processed = Some(frame.timestamp);

        let (accepted, evicted) = match &mut self.policy {
            ArrivalPolicy::Crossing(tracker) => {
                tracker.ensure_line(frame.width);
                let mut accepted = Vec::new();
                for det in &frame.detections {
                    // crossing needs a stable identity
                    let Some(track_id) = det.track_id else {
                        continue;
                    };
                    if tracker.observe(
                        track_id,
                        det.bbox.center_x(),
                        det.confidence,
                        det.class,
                        frame.timestamp,
                    ) {
                        accepted.push(det.clone());
                    }
                }
                (accepted, tracker.evict(frame.timestamp))
            }
            ArrivalPolicy::Cooldown(dedup) => {
                (dedup.offer_frame(frame).into_iter().collect(), Vec::new())
            }
        };

        if frame.is_empty() {
            log::trace!("{}", PipelineError::StaleDetectorOutput);
            return FrameOutcome::NoObservations { evicted };
        }

        let arrivals = accepted
            .iter()
            .map(|det| self.record_arrival(frame, det))
            .collect();
        FrameOutcome::Processed { arrivals, evicted }
    }

    /// Persist one accepted arrival. The policy has already committed to it.
    fn record_arrival(&mut self, frame: &FrameDetections, det: &Detection) -> ArrivalEvent {
        let image_path = match (&self.snapshots, &frame.snapshot) {
            (Some(snapshots), Some(source)) => {
                match snapshots.save(&frame.timestamp, det.track_id, source) {
                    Ok(path) => Some(path.display().to_string()),
                    Err(e) => {
                        log::error!("{}", e);
                        None
                    }
                }
            }
            _ => None,
        };
        let event = ArrivalEvent::new(frame.timestamp, det.class, det.confidence)
            .with_tracking_id(det.track_id)
            .with_image_path(image_path);

        log::info!(
            "{} arrival at {} (confidence {:.2}{})",
            event.class,
            crate::time::format_timestamp(&event.timestamp),
            event.confidence,
            event
                .tracking_id
                .map(|id| format!(", track {}", id))
                .unwrap_or_default()
        );
        if let Err(e) = self.store.append_event(&event) {
            log::error!("{}", e);
        }
        event
    }

    /// Full recompute of interval buckets from the event log.
    pub fn recompute(&mut self, now: NaiveDateTime) -> PipelineResult<usize> {
        let events = self.store.events()?;
        let buckets = IntervalAggregator::recompute(&events, now);
        if buckets.is_empty() {
            return Err(PipelineError::InsufficientHistory(
                "fewer than two arrivals recorded",
            ));
        }
        self.store.upsert_buckets(&buckets)
    }

    /// Forecast from the latest event and persist the record.
    pub fn forecast(&mut self, now: NaiveDateTime) -> PipelineResult<Forecast> {
        let last = self
            .store
            .latest_event()?
            .ok_or(PipelineError::InsufficientHistory("no arrivals recorded"))?;
        let forecast = Forecaster::forecast(now, &last, self.store.as_ref())?;
        self.store.append_forecast(&forecast.record)?;
        Ok(forecast)
    }

    /// Recompute then forecast. Expected shortfalls are logged and yield `None`.
    pub fn refresh_forecast(&mut self, now: NaiveDateTime) -> PipelineResult<Option<Forecast>> {
        match self.recompute(now) {
            Ok(n) => log::debug!("upserted {} interval buckets", n),
            Err(e) if e.is_expected() => log::info!("{}", e),
            Err(e) => return Err(e),
        }
        match self.forecast(now) {
            Ok(forecast) => {
                log::info!(
                    "next arrival predicted at {} (interval {:.0}s, {:?})",
                    crate::time::format_timestamp(&forecast.record.predicted_arrival_at),
                    forecast.record.interval_seconds,
                    forecast.source
                );
                Ok(Some(forecast))
            }
            Err(e) if e.is_expected() => {
                log::info!("{}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Counters for one [`ArrivalPipeline::run`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped: u64,
    pub arrivals: u64,
    pub forecasts: u64,
}

const HEALTH_LOG_EVERY: u64 = 1_000;

impl ArrivalPipeline {
    /// Drain `source` until it ends or `stop` is raised.
    ///
    /// The pipeline is clocked by frame timestamps: a refresh runs after
    /// every frame with arrivals and whenever `refresh_every` has elapsed
    /// since the previous one, plus once more at the end if the last frame
    /// did not already trigger one.
    pub fn run<S>(
        &mut self,
        source: &mut S,
        stop: &AtomicBool,
        refresh_every: std::time::Duration,
    ) -> anyhow::Result<RunSummary>
    where
        S: DetectorSource + ?Sized,
    {
        let refresh_every = saturating_span(refresh_every);
        let mut summary = RunSummary::default();
        let mut last_refresh: Option<NaiveDateTime> = None;
        let mut clock: Option<NaiveDateTime> = None;

        while !stop.load(Ordering::SeqCst) {
            let Some(frame) = source.next_frame()? else {
                log::info!("{} source ended", source.name());
                break;
            };
            summary.frames += 1;
            clock = Some(frame.timestamp);

            let outcome = self.process_frame(&frame);
            if outcome == FrameOutcome::Skipped {
                summary.skipped += 1;
            }
            let arrived = !outcome.arrivals().is_empty();
            summary.arrivals += outcome.arrivals().len() as u64;

            let due = last_refresh
                .map(|last| frame.timestamp - last >= refresh_every)
                .unwrap_or(true);
            if arrived || due {
                summary.forecasts += self.refresh_logged(frame.timestamp);
                last_refresh = Some(frame.timestamp);
            }

            if summary.frames % HEALTH_LOG_EVERY == 0 {
                let stats = source.stats();
                log::info!(
                    "health: frames={} skipped={} rejected={} arrivals={}",
                    summary.frames,
                    summary.skipped,
                    stats.frames_rejected,
                    summary.arrivals
                );
            }
        }

        if let Some(now) = clock.filter(|now| last_refresh != Some(*now)) {
            summary.forecasts += self.refresh_logged(now);
        }
        Ok(summary)
    }

    fn refresh_logged(&mut self, now: NaiveDateTime) -> u64 {
        match self.refresh_forecast(now) {
            Ok(Some(_)) => 1,
            Ok(None) => 0,
            Err(e) => {
                log::error!("forecast refresh failed: {}", e);
                0
            }
        }
    }
}
