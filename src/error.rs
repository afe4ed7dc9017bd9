//! Error kinds surfaced by the arrival pipeline.
//!
//! Most of these are expected outcomes rather than faults: callers log them
//! and keep processing frames.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stored or received timestamp matched none of the accepted formats.
    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    /// Fewer than two events, or no matching/fallback interval bucket.
    #[error("insufficient history: {0}")]
    InsufficientHistory(&'static str),

    /// The durable store could not be reached or a write failed.
    #[error("store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored interval would push the prediction outside the calendar.
    #[error("interval of {0} seconds is out of range")]
    IntervalOutOfRange(f64),

    /// The detector produced no observations for a frame.
    #[error("detector produced no observations")]
    StaleDetectorOutput,

    /// A detector frame could not be decoded.
    #[error("invalid detector output: {0}")]
    InvalidDetection(String),

    #[error("snapshot write failed for {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn store(operation: &'static str, source: rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable { operation, source }
    }

    /// True for outcomes that are part of normal operation.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientHistory(_) | PipelineError::StaleDetectorOutput
        )
    }
}
