use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::{DedupSettings, DEFAULT_COOLDOWN_SECS, DEFAULT_DEDUP_CONFIDENCE};
use crate::detect::ObjectClass;
use crate::pipeline::{ArrivalMode, PipelineSettings, DEFAULT_FRAME_INTERVAL_MS};
use crate::tracker::{TrackerSettings, DEFAULT_STALE_SECS, DEFAULT_TRACK_CONFIDENCE};

const DEFAULT_DB_PATH: &str = "arrivals.db";
const DEFAULT_CAPTURE_DIR: &str = "bus_captures";
const DEFAULT_RECOMPUTE_SECS: u64 = 300;
/// Upper bound for every configured duration (one year).
const MAX_CONFIGURED_SPAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Deserialize, Default)]
struct ArrivaldConfigFile {
    db_path: Option<String>,
    capture_dir: Option<PathBuf>,
    target_class: Option<String>,
    mode: Option<String>,
    frame_interval_ms: Option<u64>,
    recompute_secs: Option<u64>,
    tracker: Option<TrackerConfigFile>,
    dedup: Option<DedupConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    line_x: Option<f32>,
    min_confidence: Option<f32>,
    stale_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    min_confidence: Option<f32>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ArrivaldConfig {
    pub db_path: String,
    pub capture_dir: Option<PathBuf>,
    pub target_class: ObjectClass,
    pub mode: ArrivalMode,
    pub tracker: TrackerSettings,
    pub dedup: DedupSettings,
    pub frame_interval: Duration,
    pub recompute_interval: Duration,
}

impl ArrivaldConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ARRIVAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ArrivaldConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let capture_dir = match file.capture_dir {
            // empty disables snapshots, same as ARRIVAL_CAPTURE_DIR=""
            Some(dir) if dir.to_string_lossy().trim().is_empty() => None,
            Some(dir) => Some(dir),
            None => Some(PathBuf::from(DEFAULT_CAPTURE_DIR)),
        };
        let target_class = file
            .target_class
            .as_deref()
            .map(ObjectClass::from_label)
            .unwrap_or(ObjectClass::Bus);
        let mode = match file.mode.as_deref() {
            Some(raw) => raw.parse::<ArrivalMode>().map_err(|e| anyhow!(e))?,
            None => ArrivalMode::default(),
        };
        let tracker = TrackerSettings {
            target_class,
            line_x: file.tracker.as_ref().and_then(|t| t.line_x),
            min_confidence: file
                .tracker
                .as_ref()
                .and_then(|t| t.min_confidence)
                .unwrap_or(DEFAULT_TRACK_CONFIDENCE),
            stale_after: Duration::from_secs(
                file.tracker
                    .as_ref()
                    .and_then(|t| t.stale_secs)
                    .unwrap_or(DEFAULT_STALE_SECS),
            ),
        };
        let dedup = DedupSettings {
            target_class,
            min_confidence: file
                .dedup
                .as_ref()
                .and_then(|d| d.min_confidence)
                .unwrap_or(DEFAULT_DEDUP_CONFIDENCE),
            cooldown: Duration::from_secs(
                file.dedup
                    .and_then(|d| d.cooldown_secs)
                    .unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
        };
        Ok(Self {
            db_path,
            capture_dir,
            target_class,
            mode,
            tracker,
            dedup,
            frame_interval: Duration::from_millis(
                file.frame_interval_ms.unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            recompute_interval: Duration::from_secs(
                file.recompute_secs.unwrap_or(DEFAULT_RECOMPUTE_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ARRIVAL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("ARRIVAL_CAPTURE_DIR") {
            // empty disables snapshots
            self.capture_dir = if dir.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }
        if let Ok(label) = std::env::var("ARRIVAL_TARGET_CLASS") {
            if !label.trim().is_empty() {
                self.target_class = ObjectClass::from_label(&label);
                self.tracker.target_class = self.target_class;
                self.dedup.target_class = self.target_class;
            }
        }
        if let Ok(mode) = std::env::var("ARRIVAL_MODE") {
            if !mode.trim().is_empty() {
                self.mode = mode.parse::<ArrivalMode>().map_err(|e| anyhow!(e))?;
            }
        }
        if let Ok(line_x) = std::env::var("ARRIVAL_LINE_X") {
            let x: f32 = line_x
                .trim()
                .parse()
                .map_err(|_| anyhow!("ARRIVAL_LINE_X must be a pixel position"))?;
            self.tracker.line_x = Some(x);
        }
        if let Ok(cooldown) = std::env::var("ARRIVAL_COOLDOWN_SECS") {
            self.dedup.cooldown = Duration::from_secs(parse_secs("ARRIVAL_COOLDOWN_SECS", &cooldown)?);
        }
        if let Ok(stale) = std::env::var("ARRIVAL_STALE_SECS") {
            self.tracker.stale_after = Duration::from_secs(parse_secs("ARRIVAL_STALE_SECS", &stale)?);
        }
        if let Ok(recompute) = std::env::var("ARRIVAL_RECOMPUTE_SECS") {
            self.recompute_interval =
                Duration::from_secs(parse_secs("ARRIVAL_RECOMPUTE_SECS", &recompute)?);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.target_class == ObjectClass::Unknown {
            return Err(anyhow!("target class is not a known detector label"));
        }
        for (name, value) in [
            ("tracker.min_confidence", self.tracker.min_confidence),
            ("dedup.min_confidence", self.dedup.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if let Some(x) = self.tracker.line_x {
            if !x.is_finite() || x < 0.0 {
                return Err(anyhow!("line_x must be a non-negative pixel position"));
            }
        }
        for (name, value) in [
            ("tracker.stale_secs", self.tracker.stale_after),
            ("dedup.cooldown_secs", self.dedup.cooldown),
            ("frame_interval_ms", self.frame_interval),
            ("recompute_secs", self.recompute_interval),
        ] {
            if value > MAX_CONFIGURED_SPAN {
                return Err(anyhow!(
                    "{} must be at most {} seconds",
                    name,
                    MAX_CONFIGURED_SPAN.as_secs()
                ));
            }
        }
        if self.tracker.stale_after.is_zero() {
            return Err(anyhow!("stale threshold must be greater than zero"));
        }
        if self.recompute_interval.is_zero() {
            return Err(anyhow!("recompute interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            mode: self.mode,
            tracker: self.tracker.clone(),
            dedup: self.dedup.clone(),
            min_frame_interval: self.frame_interval,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ArrivaldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_secs(var: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of seconds", var))
}
