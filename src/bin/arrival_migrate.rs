//! arrival_migrate - copy arrival data between SQLite stores
//!
//! The source is opened read-only and left as it is. Events and forecasts
//! are appended; buckets are upserted, so rerunning against the same target
//! does not duplicate analysis rows.

use anyhow::{anyhow, Result};
use clap::Parser;

use arrival_forecast::storage::{SqliteArrivalReader, ARRIVAL_TABLES};
use arrival_forecast::SqliteArrivalStore;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "arrival_migrate", about = "Copy events, buckets and forecasts into another store")]
struct Args {
    /// Source SQLite DB
    #[arg(long, value_name = "PATH")]
    from: String,

    /// Target SQLite DB (created if missing)
    #[arg(long, value_name = "PATH")]
    to: String,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.from == args.to {
        return Err(anyhow!("--from and --to must be different databases"));
    }
    let ui = ui::Ui::from_flag(&args.ui);

    let (source, mut target) = {
        let _stage = ui.stage("Open databases");
        let source = SqliteArrivalReader::open(&args.from)?;
        if source.tables().is_empty() {
            return Err(anyhow!("{} contains no arrival tables", args.from));
        }
        for table in ARRIVAL_TABLES {
            if !source.has_table(table) {
                log::warn!("source has no {} table, skipping", table);
            }
        }
        (source, SqliteArrivalStore::open(&args.to)?)
    };

    let counts = {
        let mut stage = ui.stage("Copy rows");
        let counts = source.copy_into(&mut target)?;
        stage.set_detail(format!(
            "{} events, {} buckets, {} forecasts",
            counts.events, counts.buckets, counts.forecasts
        ));
        counts
    };
    println!(
        "migrated {} events, {} buckets, {} forecasts from {} to {}",
        counts.events, counts.buckets, counts.forecasts, args.from, args.to
    );
    Ok(())
}
