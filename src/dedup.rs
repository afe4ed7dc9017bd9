//! Cooldown-based arrival deduplication.
//!
//! Fallback policy for cameras with no directional semantics: any confident
//! detection of the target class counts as an arrival, at most once per
//! cooldown window.

use chrono::{Duration, NaiveDateTime};

use crate::detect::{Detection, FrameDetections, ObjectClass};
use crate::time::saturating_span;

pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_DEDUP_CONFIDENCE: f32 = 0.4;

#[derive(Clone, Debug)]
pub struct DedupSettings {
    pub target_class: ObjectClass,
    pub min_confidence: f32,
    pub cooldown: std::time::Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            target_class: ObjectClass::Bus,
            min_confidence: DEFAULT_DEDUP_CONFIDENCE,
            cooldown: std::time::Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

pub struct EventDeduplicator {
    target_class: ObjectClass,
    min_confidence: f32,
    cooldown: Duration,
    last_log_time: Option<NaiveDateTime>,
}

impl EventDeduplicator {
    pub fn new(settings: &DedupSettings) -> Self {
        Self {
            target_class: settings.target_class,
            min_confidence: settings.min_confidence,
            cooldown: saturating_span(settings.cooldown),
            last_log_time: None,
        }
    }

    /// Returns true when the detection is logged as a new arrival.
    ///
    /// A rejected offer leaves the cooldown timer untouched.
    pub fn offer(&mut self, class: ObjectClass, confidence: f32, timestamp: NaiveDateTime) -> bool {
        if class != self.target_class || confidence < self.min_confidence {
            return false;
        }
        if let Some(last) = self.last_log_time {
            if timestamp - last < self.cooldown {
                return false;
            }
        }
        self.last_log_time = Some(timestamp);
        true
    }

    /// Offers the most confident qualifying detection of a frame.
    ///
    /// At most one arrival per frame; returns the detection that was logged.
    pub fn offer_frame(&mut self, frame: &FrameDetections) -> Option<Detection> {
        let best = frame
            .detections
            .iter()
            .filter(|det| det.class == self.target_class && det.confidence >= self.min_confidence)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
        if self.offer(best.class, best.confidence, frame.timestamp) {
            Some(best.clone())
        } else {
            None
        }
    }

    pub fn last_log_time(&self) -> Option<NaiveDateTime> {
        self.last_log_time
    }
}
