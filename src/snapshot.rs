use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detect::SnapshotSource;
use crate::error::{PipelineError, PipelineResult};

const FILENAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Writes arrival frame images into the capture directory.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `YYYY-MM-DD_HH-MM-SS_ID-<id>.jpg`, or without the id suffix.
    pub fn filename(timestamp: &NaiveDateTime, tracking_id: Option<u64>) -> String {
        let stamp = timestamp.format(FILENAME_FORMAT);
        match tracking_id {
            Some(id) => format!("{}_ID-{}.jpg", stamp, id),
            None => format!("{}.jpg", stamp),
        }
    }

    pub fn save(
        &self,
        timestamp: &NaiveDateTime,
        tracking_id: Option<u64>,
        source: &SnapshotSource,
    ) -> PipelineResult<PathBuf> {
        let path = self.dir.join(Self::filename(timestamp, tracking_id));
        let io_err = |source: std::io::Error| PipelineError::Snapshot {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        match source {
            SnapshotSource::Bytes(bytes) => fs::write(&path, bytes).map_err(io_err)?,
            SnapshotSource::File(src) => {
                fs::copy(src, &path).map_err(io_err)?;
            }
        }
        log::debug!("snapshot saved to {}", path.display());
        Ok(path)
    }
}
