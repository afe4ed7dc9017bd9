use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::result::FrameDetections;
use crate::detect::source::{DetectorSource, SourceStats};

/// Replays a fixed list of frames. Used by tests and dry runs.
#[derive(Default)]
pub struct ScriptedSource {
    frames: VecDeque<FrameDetections>,
    stats: SourceStats,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = FrameDetections>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            stats: SourceStats::default(),
        }
    }

    pub fn push(&mut self, frame: FrameDetections) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectorSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.stats.frames_read += 1;
        }
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
