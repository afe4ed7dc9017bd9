mod backends;
mod result;
mod source;

pub use backends::{parse_frame_record, DetectionRecord, FrameRecord, JsonLinesSource, ScriptedSource};
pub use result::{BoundingBox, Detection, FrameDetections, ObjectClass, SnapshotSource};
pub use source::{DetectorSource, SourceStats};
