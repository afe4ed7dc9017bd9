//! arrival_recompute - one-shot recompute over the full event history
//!
//! Rebuilds every interval bucket from the stored events and appends a
//! fresh forecast. Safe to run any number of times.

use anyhow::Result;
use clap::Parser;

use arrival_forecast::{
    time::{format_timestamp, parse_timestamp},
    ArrivalPipeline, IntervalSource, PipelineSettings, SqliteArrivalStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "arrival_recompute", about = "Recompute interval buckets and forecast the next arrival")]
struct Args {
    /// Path to the arrival SQLite DB
    #[arg(long, env = "ARRIVAL_DB_PATH", default_value = "arrivals.db")]
    db: String,

    /// Forecast as of this local time instead of now
    #[arg(long, value_name = "TIMESTAMP")]
    at: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_flag(&args.ui);
    let now = match &args.at {
        Some(raw) => parse_timestamp(raw)?,
        None => chrono::Local::now().naive_local(),
    };

    let mut pipeline = {
        let _stage = ui.stage("Open database");
        let store = SqliteArrivalStore::open(&args.db)?;
        ArrivalPipeline::new(&PipelineSettings::default(), Box::new(store))
    };

    {
        let mut stage = ui.stage("Recompute interval buckets");
        match pipeline.recompute(now) {
            Ok(n) => stage.set_detail(format!("{} buckets", n)),
            Err(e) if e.is_expected() => stage.set_detail(e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }

    let forecast = {
        let _stage = ui.stage("Forecast next arrival");
        match pipeline.forecast(now) {
            Ok(forecast) => Some(forecast),
            Err(e) if e.is_expected() => {
                log::info!("{}", e);
                None
            }
            Err(e) => return Err(e.into()),
        }
    };

    match forecast {
        Some(forecast) => {
            let basis = match forecast.source {
                IntervalSource::Slot(slot) => slot.to_string(),
                IntervalSource::GlobalFallback => "overall average".to_string(),
            };
            println!(
                "last arrival {} + {:.0}s ({}) -> predicted {}",
                format_timestamp(&forecast.record.last_arrival_at),
                forecast.record.interval_seconds,
                basis,
                format_timestamp(&forecast.record.predicted_arrival_at)
            );
        }
        None => println!("not enough history to forecast"),
    }
    Ok(())
}
