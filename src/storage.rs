use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::{PipelineError, PipelineResult};
use crate::forecast::BucketLookup;
use crate::time::{
    format_date, format_timestamp, parse_timestamp, weekday_name, Daypart, TimeSlot, DATE_FORMAT,
};
use crate::{ArrivalEvent, ForecastRecord, IntervalBucket, ObjectClass};

/// Durable store for the pipeline.
///
/// Events and forecasts are append-only; buckets are upserted by
/// (date, day-of-week, daypart). Reads skip rows whose timestamps do not
/// parse instead of failing the caller.
pub trait ArrivalStore: BucketLookup {
    fn append_event(&mut self, ev: &ArrivalEvent) -> PipelineResult<()>;

    /// Insert or overwrite every bucket. Returns the number of rows written.
    fn upsert_buckets(&mut self, buckets: &[IntervalBucket]) -> PipelineResult<usize>;

    fn append_forecast(&mut self, record: &ForecastRecord) -> PipelineResult<()>;

    /// Full event log ordered by timestamp.
    fn events(&self) -> PipelineResult<Vec<ArrivalEvent>>;

    /// Events with `start <= timestamp < end`, ordered.
    fn events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> PipelineResult<Vec<ArrivalEvent>>;

    fn latest_event(&self) -> PipelineResult<Option<ArrivalEvent>>;

    fn buckets(&self) -> PipelineResult<Vec<IntervalBucket>>;

    /// Forecast with the latest generation time.
    fn latest_forecast(&self) -> PipelineResult<Option<ForecastRecord>>;

    fn forecasts(&self) -> PipelineResult<Vec<ForecastRecord>>;
}

trait StoreResultExt<T> {
    fn store_op(self, operation: &'static str) -> PipelineResult<T>;
}

impl<T> StoreResultExt<T> for rusqlite::Result<T> {
    fn store_op(self, operation: &'static str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::store(operation, e))
    }
}

/// Add any missing columns to an existing table.
///
/// Older `detections` tables only carried a timestamp; new columns are
/// appended in place so existing rows survive.
pub fn ensure_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> rusqlite::Result<()> {
    let existing = column_names(conn, table)?;
    for (name, decl) in columns {
        if !existing.iter().any(|col| col == name) {
            conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, decl), [])?;
        }
    }
    Ok(())
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get(1)?);
    }
    Ok(names)
}

pub struct SqliteArrivalStore {
    conn: Connection,
}

impl SqliteArrivalStore {
    pub fn open(db_path: &str) -> PipelineResult<Self> {
        let conn = crate::open_db_connection(db_path).store_op("open")?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::open(&crate::shared_memory_uri())
    }

    fn ensure_schema(&mut self) -> PipelineResult<()> {
        self.conn
            .execute_batch(
                r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_analysis (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              analysis_date TEXT NOT NULL,
              day_of_week TEXT NOT NULL,
              daypart TEXT NOT NULL,
              average_interval_seconds REAL,
              detection_count INTEGER,
              last_updated TEXT NOT NULL,
              UNIQUE(analysis_date, day_of_week, daypart)
            );

            CREATE TABLE IF NOT EXISTS arrival_forecasts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              forecast_generated_at TEXT NOT NULL,
              last_bus_detected_at TEXT NOT NULL,
              predicted_arrival_at TEXT NOT NULL,
              average_interval_used REAL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp);
            "#,
            )
            .store_op("ensure_schema")?;
        ensure_columns(
            &self.conn,
            "detections",
            &[
                ("detected_object", "TEXT NOT NULL DEFAULT 'bus'"),
                ("confidence", "REAL NOT NULL DEFAULT 1.0"),
                ("image_path", "TEXT"),
                ("tracking_id", "INTEGER"),
            ],
        )
        .store_op("ensure_columns")?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> PipelineResult<Vec<ArrivalEvent>> {
        let mut stmt = self.conn.prepare(sql).store_op("read_events")?;
        let mut rows = stmt.query(params).store_op("read_events")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().store_op("read_events")? {
            if let Some(ev) = event_from_row(row)? {
                out.push(ev);
            }
        }
        Ok(out)
    }
}

const EVENT_COLUMNS: &str = "timestamp, detected_object, confidence, image_path, tracking_id";

fn event_from_row(row: &Row<'_>) -> PipelineResult<Option<ArrivalEvent>> {
    let raw: String = row.get(0).store_op("read_events")?;
    let timestamp = match parse_timestamp(&raw) {
        Ok(ts) => ts,
        Err(e) => {
            log::warn!("skipping detection row: {}", e);
            return Ok(None);
        }
    };
    let label: String = row.get(1).store_op("read_events")?;
    let confidence: f64 = row.get(2).store_op("read_events")?;
    let image_path: Option<String> = row.get(3).store_op("read_events")?;
    let tracking_id: Option<i64> = row.get(4).store_op("read_events")?;
    Ok(Some(ArrivalEvent {
        timestamp,
        class: ObjectClass::from_label(&label),
        confidence: confidence as f32,
        image_path,
        tracking_id: tracking_id.and_then(|id| u64::try_from(id).ok()),
    }))
}

fn bucket_from_row(row: &Row<'_>) -> PipelineResult<Option<IntervalBucket>> {
    let date_raw: String = row.get(0).store_op("read_buckets")?;
    let day_raw: String = row.get(1).store_op("read_buckets")?;
    let daypart_raw: String = row.get(2).store_op("read_buckets")?;
    let average: Option<f64> = row.get(3).store_op("read_buckets")?;
    let count: Option<i64> = row.get(4).store_op("read_buckets")?;
    let updated_raw: String = row.get(5).store_op("read_buckets")?;

    let Ok(analysis_date) = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT) else {
        log::warn!("skipping analysis row: malformed date {:?}", date_raw);
        return Ok(None);
    };
    let Ok(day_of_week) = day_raw.parse::<Weekday>() else {
        log::warn!("skipping analysis row: unknown day {:?}", day_raw);
        return Ok(None);
    };
    let Ok(daypart) = daypart_raw.parse::<Daypart>() else {
        log::warn!("skipping analysis row: unknown daypart {:?}", daypart_raw);
        return Ok(None);
    };
    let Some(average_interval_seconds) = average else {
        return Ok(None);
    };
    let last_updated = match parse_timestamp(&updated_raw) {
        Ok(ts) => ts,
        Err(e) => {
            log::warn!("skipping analysis row: {}", e);
            return Ok(None);
        }
    };
    Ok(Some(IntervalBucket {
        analysis_date,
        day_of_week,
        daypart,
        average_interval_seconds,
        detection_count: count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0),
        last_updated,
    }))
}

fn forecast_from_row(row: &Row<'_>) -> PipelineResult<Option<ForecastRecord>> {
    let generated_raw: String = row.get(0).store_op("read_forecasts")?;
    let last_raw: String = row.get(1).store_op("read_forecasts")?;
    let predicted_raw: String = row.get(2).store_op("read_forecasts")?;
    let interval: Option<f64> = row.get(3).store_op("read_forecasts")?;
    let parsed = (
        parse_timestamp(&generated_raw),
        parse_timestamp(&last_raw),
        parse_timestamp(&predicted_raw),
    );
    let Some(interval_seconds) = interval else {
        return Ok(None);
    };
    match parsed {
        (Ok(generated_at), Ok(last_arrival_at), Ok(predicted_arrival_at)) => {
            Ok(Some(ForecastRecord {
                generated_at,
                last_arrival_at,
                predicted_arrival_at,
                interval_seconds,
            }))
        }
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            log::warn!("skipping forecast row: {}", e);
            Ok(None)
        }
    }
}

const BUCKET_COLUMNS: &str =
    "analysis_date, day_of_week, daypart, average_interval_seconds, detection_count, last_updated";
const FORECAST_COLUMNS: &str =
    "forecast_generated_at, last_bus_detected_at, predicted_arrival_at, average_interval_used";

impl BucketLookup for SqliteArrivalStore {
    fn latest_for_slot(&self, slot: TimeSlot) -> PipelineResult<Option<IntervalBucket>> {
        let sql = format!(
            "SELECT {} FROM daily_analysis WHERE day_of_week = ?1 AND daypart = ?2 \
             ORDER BY analysis_date DESC",
            BUCKET_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).store_op("latest_for_slot")?;
        let mut rows = stmt
            .query(params![slot.day_name(), slot.daypart.as_str()])
            .store_op("latest_for_slot")?;
        while let Some(row) = rows.next().store_op("latest_for_slot")? {
            if let Some(bucket) = bucket_from_row(row)? {
                return Ok(Some(bucket));
            }
        }
        Ok(None)
    }

    fn global_mean_interval(&self) -> PipelineResult<Option<f64>> {
        self.conn
            .query_row(
                "SELECT AVG(average_interval_seconds) FROM daily_analysis",
                [],
                |row| row.get::<_, Option<f64>>(0),
            )
            .store_op("global_mean_interval")
    }
}

impl ArrivalStore for SqliteArrivalStore {
    fn append_event(&mut self, ev: &ArrivalEvent) -> PipelineResult<()> {
        let tracking_id = ev.tracking_id.and_then(|id| i64::try_from(id).ok());
        self.conn
            .execute(
                r#"
            INSERT INTO detections(timestamp, detected_object, confidence, image_path, tracking_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
                params![
                    format_timestamp(&ev.timestamp),
                    ev.class.as_str(),
                    ev.confidence as f64,
                    ev.image_path,
                    tracking_id
                ],
            )
            .store_op("append_event")?;
        Ok(())
    }

    fn upsert_buckets(&mut self, buckets: &[IntervalBucket]) -> PipelineResult<usize> {
        let tx = self.conn.transaction().store_op("upsert_buckets")?;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                INSERT INTO daily_analysis(analysis_date, day_of_week, daypart,
                                           average_interval_seconds, detection_count, last_updated)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(analysis_date, day_of_week, daypart) DO UPDATE SET
                    average_interval_seconds = excluded.average_interval_seconds,
                    detection_count = excluded.detection_count,
                    last_updated = excluded.last_updated
                "#,
                )
                .store_op("upsert_buckets")?;
            for b in buckets {
                stmt.execute(params![
                    format_date(&b.analysis_date),
                    weekday_name(b.day_of_week),
                    b.daypart.as_str(),
                    b.average_interval_seconds,
                    b.detection_count as i64,
                    format_timestamp(&b.last_updated)
                ])
                .store_op("upsert_buckets")?;
            }
        }
        tx.commit().store_op("upsert_buckets")?;
        Ok(buckets.len())
    }

    fn append_forecast(&mut self, record: &ForecastRecord) -> PipelineResult<()> {
        self.conn
            .execute(
                r#"
            INSERT INTO arrival_forecasts(forecast_generated_at, last_bus_detected_at,
                                          predicted_arrival_at, average_interval_used)
            VALUES (?1, ?2, ?3, ?4)
            "#,
                params![
                    format_timestamp(&record.generated_at),
                    format_timestamp(&record.last_arrival_at),
                    format_timestamp(&record.predicted_arrival_at),
                    record.interval_seconds
                ],
            )
            .store_op("append_forecast")?;
        Ok(())
    }

    fn events(&self) -> PipelineResult<Vec<ArrivalEvent>> {
        let sql = format!(
            "SELECT {} FROM detections ORDER BY timestamp ASC, id ASC",
            EVENT_COLUMNS
        );
        let mut events = self.query_events(&sql, [])?;
        // rows written by other tools may use a different text format
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    fn events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> PipelineResult<Vec<ArrivalEvent>> {
        // filter after parsing: text comparison only holds for our own format
        Ok(self
            .events()?
            .into_iter()
            .filter(|ev| ev.timestamp >= start && ev.timestamp < end)
            .collect())
    }

    fn latest_event(&self) -> PipelineResult<Option<ArrivalEvent>> {
        Ok(self.events()?.pop())
    }

    fn buckets(&self) -> PipelineResult<Vec<IntervalBucket>> {
        let sql = format!(
            "SELECT {} FROM daily_analysis ORDER BY analysis_date ASC, id ASC",
            BUCKET_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).store_op("read_buckets")?;
        let mut rows = stmt.query([]).store_op("read_buckets")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().store_op("read_buckets")? {
            if let Some(bucket) = bucket_from_row(row)? {
                out.push(bucket);
            }
        }
        Ok(out)
    }

    fn latest_forecast(&self) -> PipelineResult<Option<ForecastRecord>> {
        Ok(self
            .forecasts()?
            .into_iter()
            .max_by(|a, b| a.generated_at.cmp(&b.generated_at)))
    }

    fn forecasts(&self) -> PipelineResult<Vec<ForecastRecord>> {
        let sql = format!(
            "SELECT {} FROM arrival_forecasts ORDER BY id ASC",
            FORECAST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).store_op("read_forecasts")?;
        let mut rows = stmt.query([]).store_op("read_forecasts")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().store_op("read_forecasts")? {
            if let Some(record) = forecast_from_row(row)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

/// Reads a table only if it exists. Used when migrating partial databases.
pub fn table_exists(conn: &Connection, table: &str) -> PipelineResult<bool> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|name| name.is_some())
    .store_op("table_exists")
}

/// Rows copied by [`copy_all`] or [`SqliteArrivalReader::copy_into`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyCounts {
    pub events: usize,
    pub buckets: usize,
    pub forecasts: usize,
}

/// Copy every readable row from `source` into `target`.
///
/// Rows with malformed timestamps were already dropped on read.
pub fn copy_all<S, T>(source: &S, target: &mut T) -> PipelineResult<CopyCounts>
where
    S: ArrivalStore + ?Sized,
    T: ArrivalStore + ?Sized,
{
    write_rows(
        target,
        &source.events()?,
        &source.buckets()?,
        &source.forecasts()?,
    )
}

fn write_rows<T>(
    target: &mut T,
    events: &[ArrivalEvent],
    buckets: &[IntervalBucket],
    forecasts: &[ForecastRecord],
) -> PipelineResult<CopyCounts>
where
    T: ArrivalStore + ?Sized,
{
    for ev in events {
        target.append_event(ev)?;
    }
    let buckets = target.upsert_buckets(buckets)?;
    for record in forecasts {
        target.append_forecast(record)?;
    }
    Ok(CopyCounts {
        events: events.len(),
        buckets,
        forecasts: forecasts.len(),
    })
}

// -------------------- Read-only source --------------------

pub const ARRIVAL_TABLES: [&str; 3] = ["detections", "daily_analysis", "arrival_forecasts"];

/// Read-only view of an existing database.
///
/// Opening never creates the file or touches its schema. Missing tables
/// read as empty, and `detections` tables from older schemas are read with
/// defaults for the columns they lack.
pub struct SqliteArrivalReader {
    conn: Connection,
    tables: Vec<&'static str>,
}

impl SqliteArrivalReader {
    pub fn open(db_path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .store_op("open_read_only")?;
        let mut tables = Vec::new();
        for table in ARRIVAL_TABLES {
            if table_exists(&conn, table)? {
                tables.push(table);
            }
        }
        Ok(Self { conn, tables })
    }

    /// Arrival tables present in the database.
    pub fn tables(&self) -> &[&'static str] {
        &self.tables
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| *t == table)
    }

    pub fn events(&self) -> PipelineResult<Vec<ArrivalEvent>> {
        if !self.has_table("detections") {
            return Ok(Vec::new());
        }
        let existing = column_names(&self.conn, "detections").store_op("read_events")?;
        if !existing.iter().any(|col| col == "timestamp") {
            log::warn!("detections table has no timestamp column, skipping");
            return Ok(Vec::new());
        }
        let columns: Vec<String> = [
            ("timestamp", "NULL"),
            ("detected_object", "'bus'"),
            ("confidence", "1.0"),
            ("image_path", "NULL"),
            ("tracking_id", "NULL"),
        ]
        .iter()
        .map(|(name, fallback)| {
            if existing.iter().any(|col| col == name) {
                name.to_string()
            } else {
                format!("{} AS {}", fallback, name)
            }
        })
        .collect();
        let sql = format!(
            "SELECT {} FROM detections ORDER BY timestamp ASC",
            columns.join(", ")
        );
        let mut events = read_rows(&self.conn, &sql, "read_events", event_from_row)?;
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    pub fn buckets(&self) -> PipelineResult<Vec<IntervalBucket>> {
        if !self.has_table("daily_analysis") {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM daily_analysis ORDER BY analysis_date ASC",
            BUCKET_COLUMNS
        );
        read_rows(&self.conn, &sql, "read_buckets", bucket_from_row)
    }

    pub fn forecasts(&self) -> PipelineResult<Vec<ForecastRecord>> {
        if !self.has_table("arrival_forecasts") {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM arrival_forecasts ORDER BY forecast_generated_at ASC",
            FORECAST_COLUMNS
        );
        read_rows(&self.conn, &sql, "read_forecasts", forecast_from_row)
    }

    /// Copy the tables that exist into `target`.
    pub fn copy_into<T>(&self, target: &mut T) -> PipelineResult<CopyCounts>
    where
        T: ArrivalStore + ?Sized,
    {
        write_rows(target, &self.events()?, &self.buckets()?, &self.forecasts()?)
    }
}

fn read_rows<T>(
    conn: &Connection,
    sql: &str,
    operation: &'static str,
    decode: fn(&Row<'_>) -> PipelineResult<Option<T>>,
) -> PipelineResult<Vec<T>> {
    let mut stmt = conn.prepare(sql).store_op(operation)?;
    let mut rows = stmt.query([]).store_op(operation)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().store_op(operation)? {
        if let Some(item) = decode(row)? {
            out.push(item);
        }
    }
    Ok(out)
}

// -------------------- In-memory backend --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryArrivalStore {
    events: Vec<ArrivalEvent>,
    buckets: Vec<IntervalBucket>,
    forecasts: Vec<ForecastRecord>,
}

impl InMemoryArrivalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketLookup for InMemoryArrivalStore {
    fn latest_for_slot(&self, slot: TimeSlot) -> PipelineResult<Option<IntervalBucket>> {
        self.buckets.as_slice().latest_for_slot(slot)
    }

    fn global_mean_interval(&self) -> PipelineResult<Option<f64>> {
        self.buckets.as_slice().global_mean_interval()
    }
}

impl ArrivalStore for InMemoryArrivalStore {
    fn append_event(&mut self, ev: &ArrivalEvent) -> PipelineResult<()> {
        self.events.push(ev.clone());
        Ok(())
    }

    fn upsert_buckets(&mut self, buckets: &[IntervalBucket]) -> PipelineResult<usize> {
        for bucket in buckets {
            match self.buckets.iter_mut().find(|b| b.key() == bucket.key()) {
                Some(existing) => {
                    existing.average_interval_seconds = bucket.average_interval_seconds;
                    existing.detection_count = bucket.detection_count;
                    existing.last_updated = bucket.last_updated;
                }
                None => self.buckets.push(bucket.clone()),
            }
        }
        Ok(buckets.len())
    }

    fn append_forecast(&mut self, record: &ForecastRecord) -> PipelineResult<()> {
        self.forecasts.push(record.clone());
        Ok(())
    }

    fn events(&self) -> PipelineResult<Vec<ArrivalEvent>> {
        let mut events = self.events.clone();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    fn events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> PipelineResult<Vec<ArrivalEvent>> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|ev| ev.timestamp >= start && ev.timestamp < end)
            .collect())
    }

    fn latest_event(&self) -> PipelineResult<Option<ArrivalEvent>> {
        Ok(self.events.iter().max_by_key(|ev| ev.timestamp).cloned())
    }

    fn buckets(&self) -> PipelineResult<Vec<IntervalBucket>> {
        let mut buckets = self.buckets.clone();
        buckets.sort_by(|a, b| {
            (a.analysis_date, a.daypart).cmp(&(b.analysis_date, b.daypart))
        });
        Ok(buckets)
    }

    fn latest_forecast(&self) -> PipelineResult<Option<ForecastRecord>> {
        Ok(self
            .forecasts
            .iter()
            .max_by(|a, b| a.generated_at.cmp(&b.generated_at))
            .cloned())
    }

    fn forecasts(&self) -> PipelineResult<Vec<ForecastRecord>> {
        Ok(self.forecasts.clone())
    }
}
