use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use arrival_forecast::aggregate::IntervalAggregator;
use arrival_forecast::storage::{copy_all, table_exists, CopyCounts, SqliteArrivalReader};
use arrival_forecast::{
    ArrivalEvent, ArrivalStore, Forecaster, InMemoryArrivalStore, ObjectClass, SqliteArrivalStore,
};

fn monday(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn seeded_store(path: &str) -> SqliteArrivalStore {
    let mut store = SqliteArrivalStore::open(path).unwrap();
    for ts in [monday(9, 0, 0), monday(9, 10, 0), monday(9, 25, 0)] {
        store
            .append_event(&ArrivalEvent::new(ts, ObjectClass::Bus, 0.9))
            .unwrap();
    }
    let events = store.events().unwrap();
    store
        .upsert_buckets(&IntervalAggregator::recompute(&events, monday(10, 0, 0)))
        .unwrap();
    let last = store.latest_event().unwrap().unwrap();
    let forecast = Forecaster::forecast(monday(10, 0, 0), &last, &store).unwrap();
    store.append_forecast(&forecast.record).unwrap();
    store
}

#[test]
fn legacy_file_database_is_upgraded_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE detections (id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT NOT NULL);
             INSERT INTO detections(timestamp) VALUES ('2024-03-04 09:00:00.123456');
             INSERT INTO detections(timestamp) VALUES ('2024-03-04T09:12:00Z');
             INSERT INTO detections(timestamp) VALUES ('yesterday-ish');",
        )
        .unwrap();
    }

    let store = SqliteArrivalStore::open(path.to_str().unwrap()).unwrap();
    let events = store.events().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|ev| ev.class == ObjectClass::Bus));
    assert!(events.iter().all(|ev| ev.image_path.is_none() && ev.tracking_id.is_none()));

    let buckets = IntervalAggregator::recompute(&events, monday(10, 0, 0));
    assert_eq!(buckets.len(), 1);
    assert!((buckets[0].average_interval_seconds - 719.876544).abs() < 1e-6);
}

#[test]
fn events_between_is_half_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("range.db");
    let store = seeded_store(path.to_str().unwrap());

    let hits = store
        .events_between(monday(9, 0, 0), monday(9, 25, 0))
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].timestamp, monday(9, 0, 0));
}

#[test]
fn copy_all_migrates_every_table_and_upserts_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("from.db");
    let to = dir.path().join("to.db");
    let source = seeded_store(from.to_str().unwrap());
    let mut target = SqliteArrivalStore::open(to.to_str().unwrap()).unwrap();

    let counts = copy_all(&source, &mut target).unwrap();
    assert_eq!(
        counts,
        CopyCounts {
            events: 3,
            buckets: 1,
            forecasts: 1
        }
    );
    assert_eq!(target.events().unwrap(), source.events().unwrap());
    assert_eq!(target.latest_forecast().unwrap(), source.latest_forecast().unwrap());

    // a second run must not duplicate analysis rows
    copy_all(&source, &mut target).unwrap();
    assert_eq!(target.buckets().unwrap().len(), 1);
    assert_eq!(target.buckets().unwrap(), source.buckets().unwrap());
}

#[test]
fn copy_into_memory_store_matches_source() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("from.db");
    let source = seeded_store(from.to_str().unwrap());
    let mut target = InMemoryArrivalStore::new();
    copy_all(&source, &mut target).unwrap();
    assert_eq!(target.events().unwrap(), source.events().unwrap());
    assert_eq!(target.buckets().unwrap(), source.buckets().unwrap());
    assert_eq!(target.forecasts().unwrap(), source.forecasts().unwrap());
}

#[test]
fn table_exists_reports_missing_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE detections (id INTEGER PRIMARY KEY, timestamp TEXT)")
        .unwrap();
    assert!(table_exists(&conn, "detections").unwrap());
    assert!(!table_exists(&conn, "daily_analysis").unwrap());
}

fn column_count(conn: &Connection, table: &str) -> usize {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .unwrap();
    stmt.query_map([], |_| Ok(())).unwrap().count()
}

#[test]
fn reader_copies_partial_source_without_touching_it() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("forecasts_only.db");
    let to = dir.path().join("to.db");
    {
        let conn = Connection::open(&from).unwrap();
        conn.execute_batch(
            "CREATE TABLE arrival_forecasts (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               forecast_generated_at TEXT NOT NULL,
               last_bus_detected_at TEXT NOT NULL,
               predicted_arrival_at TEXT NOT NULL,
               average_interval_used REAL
             );
             INSERT INTO arrival_forecasts(forecast_generated_at, last_bus_detected_at,
               predicted_arrival_at, average_interval_used)
             VALUES ('2024-03-04 10:00:00', '2024-03-04 09:25:00', '2024-03-04 09:37:30', 750.0);",
        )
        .unwrap();
    }

    let source = SqliteArrivalReader::open(from.to_str().unwrap()).unwrap();
    assert_eq!(source.tables(), &["arrival_forecasts"]);
    let mut target = SqliteArrivalStore::open(to.to_str().unwrap()).unwrap();
    let counts = source.copy_into(&mut target).unwrap();
    assert_eq!(
        counts,
        CopyCounts {
            events: 0,
            buckets: 0,
            forecasts: 1
        }
    );
    assert_eq!(
        target.latest_forecast().unwrap().unwrap().predicted_arrival_at,
        monday(9, 37, 30)
    );
    drop(source);

    let conn = Connection::open(&from).unwrap();
    assert!(!table_exists(&conn, "detections").unwrap());
    assert!(!table_exists(&conn, "daily_analysis").unwrap());
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "delete");
}

#[test]
fn reader_fills_defaults_for_legacy_detection_columns() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("legacy.db");
    {
        let conn = Connection::open(&from).unwrap();
        conn.execute_batch(
            "CREATE TABLE detections (id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT NOT NULL);
             INSERT INTO detections(timestamp) VALUES ('2024-03-04 09:10:00');
             INSERT INTO detections(timestamp) VALUES ('2024-03-04 09:00:00');",
        )
        .unwrap();
    }

    let source = SqliteArrivalReader::open(from.to_str().unwrap()).unwrap();
    let events = source.events().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].timestamp, monday(9, 0, 0));
    assert!(events
        .iter()
        .all(|ev| ev.class == ObjectClass::Bus && ev.confidence == 1.0 && ev.tracking_id.is_none()));
    assert!(source.buckets().unwrap().is_empty());
    drop(source);

    let conn = Connection::open(&from).unwrap();
    assert_eq!(column_count(&conn, "detections"), 2);
}

#[test]
fn reader_does_not_create_missing_database() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nowhere.db");
    assert!(SqliteArrivalReader::open(missing.to_str().unwrap()).is_err());
    assert!(!missing.exists());
}
