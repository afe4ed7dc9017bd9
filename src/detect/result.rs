use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};

/// Axis-aligned bounding box in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }
}

/// Closed label vocabulary the detector may emit.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectClass {
    Person,
    Bicycle,
    Car,
    Motorcycle,
    Bus,
    Truck,
    Unknown,
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" => ObjectClass::Person,
            "bicycle" => ObjectClass::Bicycle,
            "car" => ObjectClass::Car,
            "motorcycle" => ObjectClass::Motorcycle,
            "bus" => ObjectClass::Bus,
            "truck" => ObjectClass::Truck,
            _ => ObjectClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Bicycle => "bicycle",
            ObjectClass::Car => "car",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Bus => "bus",
            ObjectClass::Truck => "truck",
            ObjectClass::Unknown => "unknown",
        }
    }
}

impl From<String> for ObjectClass {
    fn from(label: String) -> Self {
        ObjectClass::from_label(&label)
    }
}

impl From<ObjectClass> for String {
    fn from(class: ObjectClass) -> Self {
        class.as_str().to_string()
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector observation. Ephemeral: never persisted as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Assigned by the detector; may restart or be absent.
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::InvalidDetection(format!(
                "confidence {} out of bounds",
                self.confidence
            )));
        }
        if self.bbox.x2 < self.bbox.x1 || self.bbox.y2 < self.bbox.y1 {
            return Err(PipelineError::InvalidDetection(
                "bounding box corners inverted".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the frame image for a logged arrival can be obtained.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotSource {
    /// Encoded JPEG bytes handed over by an in-process detector.
    Bytes(Vec<u8>),
    /// Image already written by the detector; copied into the capture dir.
    File(PathBuf),
}

/// All detections for a single processed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDetections {
    pub timestamp: NaiveDateTime,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub snapshot: Option<SnapshotSource>,
}

impl FrameDetections {
    pub fn new(timestamp: NaiveDateTime, width: u32, height: u32) -> Self {
        Self {
            timestamp,
            width,
            height,
            detections: Vec::new(),
            snapshot: None,
        }
    }

    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detections.push(detection);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotSource) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
