//! arrivald - arrival tracking daemon
//!
//! Reads detector frames as JSON lines, decides arrivals (line crossing or
//! cooldown), appends them to the SQLite store and keeps the interval
//! buckets and next-arrival forecast fresh.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrival_forecast::{
    config::ArrivaldConfig, ArrivalPipeline, DetectorSource, JsonLinesSource, SnapshotStore,
    SqliteArrivalStore,
};

#[derive(Parser, Debug)]
#[command(name = "arrivald", about = "Track arrivals from detector output and forecast the next one")]
struct Args {
    /// Detector output (one JSON frame per line). Reads stdin when omitted.
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = ArrivaldConfig::load()?;

    let store = SqliteArrivalStore::open(&cfg.db_path)?;
    let mut pipeline = ArrivalPipeline::new(&cfg.pipeline_settings(), Box::new(store));
    if let Some(dir) = &cfg.capture_dir {
        pipeline = pipeline.with_snapshots(SnapshotStore::new(dir));
        log::info!("snapshots written to {}", dir.display());
    }

    let mut source: Box<dyn DetectorSource> = match &args.input {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| anyhow!("failed to open detector input {}: {}", path.display(), e))?;
            Box::new(JsonLinesSource::new(BufReader::new(file)))
        }
        None => Box::new(JsonLinesSource::new(std::io::stdin().lock())),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    log::info!(
        "arrivald running. mode={}, target={}, writing to {}",
        cfg.mode,
        cfg.target_class,
        cfg.db_path
    );
    if let Some(x) = cfg.tracker.line_x {
        log::info!("reference line fixed at x={}", x);
    }

    let summary = pipeline.run(source.as_mut(), &stop, cfg.recompute_interval)?;
    if stop.load(Ordering::SeqCst) {
        log::info!("shutdown signal received");
    }
    log::info!(
        "arrivald stopped: frames={} skipped={} arrivals={} forecasts={}",
        summary.frames,
        summary.skipped,
        summary.arrivals,
        summary.forecasts
    );
    Ok(())
}
