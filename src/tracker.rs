//! Line-crossing tracker.
//!
//! Keeps one [`TrackedObject`] per detector tracking id and reports a
//! right-to-left crossing of a vertical reference line at most once per id.
//! The table is owned exclusively by the tracker; stale entries are removed
//! by an explicit [`LineCrossingTracker::evict`] sweep.

use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;

use crate::detect::ObjectClass;
use crate::time::saturating_span;

pub const DEFAULT_STALE_SECS: u64 = 30;
pub const DEFAULT_TRACK_CONFIDENCE: f32 = 0.5;

/// Which side of the reference line a center position falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    OnLine,
    Right,
}

impl Side {
    pub fn of(center_x: f32, line_x: f32) -> Self {
        if center_x > line_x {
            Side::Right
        } else if center_x < line_x {
            Side::Left
        } else {
            Side::OnLine
        }
    }
}

/// Per-id tracking state. An id not in the table is unseen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    RightOfLine,
    LeftOfLine,
    /// Terminal: the id has logged, or was first seen where it can never log.
    Logged,
}

impl TrackState {
    /// Full transition table. `prev == None` is the first observation.
    ///
    /// Returns the next state and whether this observation is a crossing
    /// that must be logged.
    pub fn transition(prev: Option<TrackState>, side: Side) -> (TrackState, bool) {
        use TrackState::*;
        match (prev, side) {
            (None, Side::Right) => (RightOfLine, false),
            // First seen left of (or on) the line: counted elsewhere or irrelevant.
            (None, Side::Left | Side::OnLine) => (Logged, false),
            (Some(RightOfLine), Side::Left) => (Logged, true),
            (Some(RightOfLine), Side::Right | Side::OnLine) => (RightOfLine, false),
            (Some(LeftOfLine), Side::Right) => (RightOfLine, false),
            (Some(LeftOfLine), Side::Left | Side::OnLine) => (LeftOfLine, false),
            (Some(Logged), _) => (Logged, false),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub last_x: f32,
    pub logged: bool,
    pub last_seen: NaiveDateTime,
    pub state: TrackState,
}

#[derive(Clone, Debug)]
pub struct TrackerSettings {
    pub target_class: ObjectClass,
    pub min_confidence: f32,
    /// Reference line x in pixels; half the frame width when unset.
    pub line_x: Option<f32>,
    pub stale_after: std::time::Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            target_class: ObjectClass::Bus,
            min_confidence: DEFAULT_TRACK_CONFIDENCE,
            line_x: None,
            stale_after: std::time::Duration::from_secs(DEFAULT_STALE_SECS),
        }
    }
}

pub struct LineCrossingTracker {
    target_class: ObjectClass,
    min_confidence: f32,
    line_x: Option<f32>,
    stale_after: Duration,
    tracks: HashMap<u64, TrackedObject>,
}

impl LineCrossingTracker {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            target_class: settings.target_class,
            min_confidence: settings.min_confidence,
            line_x: settings.line_x,
            stale_after: saturating_span(settings.stale_after),
            tracks: HashMap::new(),
        }
    }

    pub fn line_x(&self) -> Option<f32> {
        self.line_x
    }

    /// Fix the reference line from the first frame with a known width.
    pub fn ensure_line(&mut self, frame_width: u32) {
        if self.line_x.is_none() && frame_width > 0 {
            let line_x = (frame_width / 2) as f32;
            log::info!("reference line set to x={} (frame width {})", line_x, frame_width);
            self.line_x = Some(line_x);
        }
    }

    /// Feed one observation. Returns true exactly when this observation is
    /// the id's right-to-left crossing.
    ///
    /// Observations of other classes or below the confidence threshold are
    /// ignored without touching the table. The `logged` flag is set before
    /// the caller persists anything, so a failed write never re-arms the id.
    pub fn observe(
        &mut self,
        track_id: u64,
        center_x: f32,
        confidence: f32,
        class: ObjectClass,
        timestamp: NaiveDateTime,
    ) -> bool {
        if class != self.target_class || confidence < self.min_confidence {
            return false;
        }
        let Some(line_x) = self.line_x else {
            log::warn!("observation for track {} before reference line is known", track_id);
            return false;
        };
        let side = Side::of(center_x, line_x);

        match self.tracks.get_mut(&track_id) {
            None => {
                let (state, _) = TrackState::transition(None, side);
                if state == TrackState::RightOfLine {
                    log::debug!("track {} first seen right of line, now tracking", track_id);
                }
                self.tracks.insert(
                    track_id,
                    TrackedObject {
                        last_x: center_x,
                        logged: state == TrackState::Logged,
                        last_seen: timestamp,
                        state,
                    },
                );
                false
            }
            Some(obj) => {
                let (state, crossed) = TrackState::transition(Some(obj.state), side);
                let crossed = crossed && !obj.logged;
                obj.state = state;
                if crossed {
                    obj.logged = true;
                    log::info!("track {} crossed from right to left", track_id);
                }
                obj.last_x = center_x;
                obj.last_seen = timestamp;
                crossed
            }
        }
    }

    /// Remove every id not seen for longer than the stale threshold.
    pub fn evict(&mut self, now: NaiveDateTime) -> Vec<u64> {
        let stale_after = self.stale_after;
        let mut removed: Vec<u64> = self
            .tracks
            .iter()
            .filter(|(_, obj)| now - obj.last_seen > stale_after)
            .map(|(id, _)| *id)
            .collect();
        removed.sort_unstable();
        for id in &removed {
            self.tracks.remove(id);
            log::debug!(
                "removed stale track {} (not seen for {}s)",
                id,
                stale_after.num_seconds()
            );
        }
        removed
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackedObject> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, m, s)
            .unwrap()
    }

    fn tracker() -> LineCrossingTracker {
        LineCrossingTracker::new(&TrackerSettings {
            line_x: Some(640.0),
            ..TrackerSettings::default()
        })
    }

    fn bus(t: &mut LineCrossingTracker, id: u64, x: f32, ts: NaiveDateTime) -> bool {
        t.observe(id, x, 0.9, ObjectClass::Bus, ts)
    }

    #[test]
    fn right_to_left_crossing_logs_once() {
        let mut t = tracker();
        assert!(!bus(&mut t, 1, 900.0, at(0, 0)));
        assert!(!bus(&mut t, 1, 700.0, at(0, 1)));
        assert!(bus(&mut t, 1, 500.0, at(0, 2)));
        // back and forth after logging never logs again
        assert!(!bus(&mut t, 1, 900.0, at(0, 3)));
        assert!(!bus(&mut t, 1, 300.0, at(0, 4)));
        let obj = t.get(1).unwrap();
        assert!(obj.logged);
        assert_eq!(obj.state, TrackState::Logged);
        assert_eq!(obj.last_x, 300.0);
        assert_eq!(obj.last_seen, at(0, 4));
    }

    #[test]
    fn first_seen_left_never_logs() {
        let mut t = tracker();
        assert!(!bus(&mut t, 2, 100.0, at(0, 0)));
        assert!(t.get(2).unwrap().logged);
        assert!(!bus(&mut t, 2, 900.0, at(0, 1)));
        assert!(!bus(&mut t, 2, 100.0, at(0, 2)));
    }

    #[test]
    fn on_line_keeps_previous_side() {
        let mut t = tracker();
        bus(&mut t, 3, 800.0, at(0, 0));
        assert!(!bus(&mut t, 3, 640.0, at(0, 1)));
        assert_eq!(t.get(3).unwrap().state, TrackState::RightOfLine);
        assert!(bus(&mut t, 3, 600.0, at(0, 2)));
    }

    #[test]
    fn ignores_other_classes_and_low_confidence() {
        let mut t = tracker();
        assert!(!t.observe(4, 900.0, 0.9, ObjectClass::Car, at(0, 0)));
        assert!(!t.observe(4, 900.0, 0.2, ObjectClass::Bus, at(0, 0)));
        assert!(t.is_empty());
    }

    #[test]
    fn eviction_after_stale_threshold_forgets_id() {
        let mut t = tracker();
        bus(&mut t, 5, 900.0, at(0, 0));
        bus(&mut t, 5, 100.0, at(0, 1));
        assert!(t.get(5).unwrap().logged);

        assert!(t.evict(at(0, 31)).is_empty());
        assert_eq!(t.evict(at(0, 32)), vec![5]);
        assert!(t.get(5).is_none());

        // re-appearance is a brand new id
        assert!(!bus(&mut t, 5, 900.0, at(1, 0)));
        assert!(bus(&mut t, 5, 100.0, at(1, 1)));
    }

    #[test]
    fn line_defaults_to_half_frame_width() {
        let mut t = LineCrossingTracker::new(&TrackerSettings::default());
        assert!(!bus(&mut t, 6, 900.0, at(0, 0)));
        assert!(t.is_empty());
        t.ensure_line(1280);
        t.ensure_line(640);
        assert_eq!(t.line_x(), Some(640.0));
    }

    #[test]
    fn transition_table_is_total() {
        let states = [
            None,
            Some(TrackState::RightOfLine),
            Some(TrackState::LeftOfLine),
            Some(TrackState::Logged),
        ];
        let sides = [Side::Left, Side::OnLine, Side::Right];
        let mut crossings = 0;
        for prev in states {
            for side in sides {
                let (_, crossed) = TrackState::transition(prev, side);
                crossings += crossed as usize;
            }
        }
        assert_eq!(crossings, 1);
    }

    #[test]
    fn oversized_stale_threshold_never_evicts() {
        let mut t = LineCrossingTracker::new(&TrackerSettings {
            line_x: Some(640.0),
            stale_after: std::time::Duration::from_secs(u64::MAX),
            ..TrackerSettings::default()
        });
        assert!(!bus(&mut t, 1, 900.0, at(0, 0)));
        assert!(t.evict(at(0, 1)).is_empty());
        assert!(t.evict(at(59, 0)).is_empty());
        assert!(bus(&mut t, 1, 500.0, at(59, 1)));
    }
}
