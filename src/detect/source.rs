use anyhow::Result;

use crate::detect::result::FrameDetections;

/// Upstream detector contract.
///
/// The pipeline does not know how detections are computed. A source yields
/// one [`FrameDetections`] per processed frame and `None` once the stream
/// has ended. Frames with no detections are legal; they create or update no
/// tracks but still advance stale-track eviction.
pub trait DetectorSource {
    /// Source identifier, used in logs.
    fn name(&self) -> &'static str;

    fn next_frame(&mut self) -> Result<Option<FrameDetections>>;

    /// Counters for health logging.
    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub frames_rejected: u64,
}
