pub mod jsonl;
pub mod scripted;

pub use jsonl::{parse_frame_record, DetectionRecord, FrameRecord, JsonLinesSource};
pub use scripted::ScriptedSource;
