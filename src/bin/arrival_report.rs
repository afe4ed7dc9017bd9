//! arrival_report - dashboard summary for an arrival store
//!
//! Prints when the last arrival was seen, how many arrived today, today's
//! average interval and the latest predicted arrival.

use anyhow::Result;
use clap::Parser;

use arrival_forecast::{report::DashboardSummary, time::parse_timestamp, SqliteArrivalStore};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "arrival_report", about = "Show today's arrivals and the next predicted arrival")]
struct Args {
    /// Path to the arrival SQLite DB
    #[arg(long, env = "ARRIVAL_DB_PATH", default_value = "arrivals.db")]
    db: String,

    /// Report as of this local time instead of now (e.g. 2024-03-04T14:00:00)
    #[arg(long, value_name = "TIMESTAMP")]
    at: Option<String>,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_flag(&args.ui);
    let now = match &args.at {
        Some(raw) => parse_timestamp(raw)?,
        None => chrono::Local::now().naive_local(),
    };

    let store = {
        let _stage = ui.stage("Open database");
        SqliteArrivalStore::open(&args.db)?
    };
    let summary = {
        let mut stage = ui.stage("Collect summary");
        let summary = DashboardSummary::collect(&store, now);
        if let Some(count) = summary.count_today {
            stage.set_detail(format!("{} arrivals today", count));
        }
        summary
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}
