//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `Sink` trait,
//! plus the read queries used for run statistics.

use crate::model::{FareRecord, FlightSegment};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{valid_records, Sink, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::Span;

const OUTBOUND: &str = "outbound";
const INBOUND: &str = "inbound";

/// Aggregate figures over stored fares
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FareTotals {
    pub fares: u64,
    pub round_trips: u64,
    pub segments: u64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

/// SQLite sink
///
/// A sink opened with `new` records into its own row of the `runs` table.
/// One opened with `open_existing` can only be queried.
pub struct SqliteSink {
    conn: Mutex<Connection>,
    run_id: Option<i64>,
    span: Span,
}

impl SqliteSink {
    /// Opens or creates the database and starts a new run
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `config_hash` - Hash of the configuration file, stored on the run
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path, config_hash: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;
        Self::start(conn, config_hash)
    }

    /// Opens an existing database for queries without starting a run
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("database not found: {}", path.display()),
            )));
        }

        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            run_id: None,
            span: tracing::info_span!("sqlite_reader"),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory(config_hash: &str) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Self::start(conn, config_hash)
    }

    fn start(conn: Connection, config_hash: &str) -> StorageResult<Self> {
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                Utc::now().to_rfc3339(),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        let run_id = conn.last_insert_rowid();

        Ok(Self {
            conn: Mutex::new(conn),
            run_id: Some(run_id),
            span: tracing::info_span!("sqlite_sink", run_id),
        })
    }

    /// Logs under `span` instead of the default `sqlite_sink` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The run this sink records into; `None` when opened for queries
    pub fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    fn active_run(&self) -> StorageResult<i64> {
        self.run_id.ok_or(StorageError::RunNotFound(0))
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    /// Marks this sink's run finished with `status`
    pub fn finish_run(&self, status: RunStatus) -> StorageResult<()> {
        let run_id = self.active_run()?;
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), Utc::now().to_rfc3339(), run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent run, if any
    pub fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Number of fares stored across all runs
    pub fn count_fares(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fares", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of runs recorded
    pub fn count_runs(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Aggregate figures over every stored fare
    pub fn fare_totals(&self) -> StorageResult<FareTotals> {
        let conn = self.lock()?;

        let (fares, round_trips): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(return_date) FROM fares",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let segments: i64 =
            conn.query_row("SELECT COUNT(*) FROM fare_segments", [], |row| row.get(0))?;

        // Amounts are text; compare them as decimals, not as strings
        let mut stmt = conn.prepare("SELECT price FROM fares")?;
        let prices = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut min_price: Option<Decimal> = None;
        let mut max_price: Option<Decimal> = None;
        for raw in prices {
            let price = parse_decimal(&raw)?;
            min_price = Some(min_price.map_or(price, |m| m.min(price)));
            max_price = Some(max_price.map_or(price, |m| m.max(price)));
        }

        Ok(FareTotals {
            fares: fares as u64,
            round_trips: round_trips as u64,
            segments: segments as u64,
            min_price,
            max_price,
        })
    }

    /// Loads the fares of a run, in insertion order
    pub fn load_fares(&self, run_id: i64) -> StorageResult<Vec<FareRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, search_id, departure_date, return_date, price, tax
             FROM fares WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut segment_stmt = conn.prepare(
            "SELECT flight_number, cabin_class FROM fare_segments
             WHERE fare_id = ?1 AND leg = ?2 ORDER BY position",
        )?;

        let mut fares = Vec::with_capacity(rows.len());
        for (id, search_id, departure_date, return_date, price, tax) in rows {
            let mut load_leg = |leg: &str| -> StorageResult<Vec<FlightSegment>> {
                let segments = segment_stmt
                    .query_map(params![id, leg], |row| {
                        Ok(FlightSegment::new(row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(segments)
            };

            let outbound_segments = load_leg(OUTBOUND)?;
            let inbound_segments = load_leg(INBOUND)?;

            fares.push(FareRecord {
                departure_date: parse_date(departure_date)?,
                return_date: parse_date(return_date)?,
                price: parse_decimal(&price)?,
                tax: parse_decimal(&tax)?,
                outbound_segments,
                inbound_segments,
                search_id,
            });
        }

        Ok(fares)
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn persist(&self, records: &[FareRecord]) -> StorageResult<usize> {
        let run_id = self.active_run()?;
        let valid = valid_records(records, &self.span);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in &valid {
            insert_fare(&tx, run_id, record)?;
        }
        tx.commit()?;

        tracing::debug!(
            parent: &self.span,
            written = valid.len(),
            skipped = records.len() - valid.len(),
            "Persisted fares"
        );

        Ok(valid.len())
    }
}

fn insert_fare(tx: &Transaction<'_>, run_id: i64, record: &FareRecord) -> StorageResult<()> {
    tx.execute(
        "INSERT INTO fares (run_id, search_id, departure_date, return_date, price, tax, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id,
            record.search_id,
            record.departure_date.map(|d| d.to_string()),
            record.return_date.map(|d| d.to_string()),
            record.price.to_string(),
            record.tax.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    let fare_id = tx.last_insert_rowid();

    let legs = [
        (OUTBOUND, &record.outbound_segments),
        (INBOUND, &record.inbound_segments),
    ];
    for (leg, segments) in legs {
        for (position, segment) in segments.iter().enumerate() {
            tx.execute(
                "INSERT INTO fare_segments (fare_id, leg, position, flight_number, cabin_class)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    fare_id,
                    leg,
                    position as i64,
                    segment.flight_number,
                    segment.cabin_class
                ],
            )?;
        }
    }

    Ok(())
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn parse_decimal(raw: &str) -> StorageResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| StorageError::Corrupt(format!("amount '{}': {}", raw, e)))
}

fn parse_date(raw: Option<String>) -> StorageResult<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|e| StorageError::Corrupt(format!("date '{}': {}", s, e)))
    })
    .transpose()
}
