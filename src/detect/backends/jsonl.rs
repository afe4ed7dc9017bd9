//! JSON-lines detector output.
//!
//! The external detector writes one JSON object per processed frame:
//!
//! ```json
//! {"timestamp": "2024-03-04T09:10:00.250Z", "width": 1280, "height": 720,
//!  "detections": [{"label": "bus", "confidence": 0.91,
//!                  "bbox": [812.0, 140.0, 1190.0, 560.0], "track_id": 7}],
//!  "snapshot_path": "/tmp/frame_000123.jpg"}
//! ```

use anyhow::Result;
use serde::Deserialize;
use std::io::BufRead;
use std::path::PathBuf;

use crate::detect::result::{BoundingBox, Detection, FrameDetections, ObjectClass, SnapshotSource};
use crate::detect::source::{DetectorSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::time::parse_timestamp;

#[derive(Debug, Deserialize)]
pub struct FrameRecord {
    pub timestamp: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub track_id: Option<u64>,
}

/// Parse one frame line.
///
/// Returns an error if the JSON is malformed, the timestamp is outside the
/// accepted formats, or any detection fails validation.
pub fn parse_frame_record(line: &[u8]) -> PipelineResult<FrameDetections> {
    let record: FrameRecord = serde_json::from_slice(line)
        .map_err(|e| PipelineError::InvalidDetection(format!("parse error: {}", e)))?;

    let timestamp = parse_timestamp(&record.timestamp)?;
    let mut frame = FrameDetections::new(timestamp, record.width, record.height);

    for det in record.detections {
        let [x1, y1, x2, y2] = det.bbox;
        let detection = Detection {
            class: ObjectClass::from_label(&det.label),
            confidence: det.confidence,
            bbox: BoundingBox::new(x1, y1, x2, y2),
            track_id: det.track_id,
        };
        detection.validate()?;
        frame.detections.push(detection);
    }

    if let Some(path) = record.snapshot_path {
        frame.snapshot = Some(SnapshotSource::File(path));
    }
    Ok(frame)
}

/// Reads frames from any buffered reader (stdin, a file, a pipe).
///
/// Malformed lines are logged and skipped; only I/O errors end the stream
/// with an error.
pub struct JsonLinesSource<R: BufRead> {
    reader: R,
    line: String,
    stats: SourceStats,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            stats: SourceStats::default(),
        }
    }
}

impl<R: BufRead> DetectorSource for JsonLinesSource<R> {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_frame_record(trimmed.as_bytes()) {
                Ok(frame) => {
                    self.stats.frames_read += 1;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    self.stats.frames_rejected += 1;
                    log::warn!("detector line rejected: {}", e);
                }
            }
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
