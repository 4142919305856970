//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Fare-Ripple database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- One row per priced itinerary; amounts are decimal strings
CREATE TABLE IF NOT EXISTS fares (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    search_id TEXT,
    departure_date TEXT,
    return_date TEXT,
    price TEXT NOT NULL,
    tax TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fares_run ON fares(run_id);
CREATE INDEX IF NOT EXISTS idx_fares_departure ON fares(departure_date);

-- Ordered segments of each leg
CREATE TABLE IF NOT EXISTS fare_segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fare_id INTEGER NOT NULL REFERENCES fares(id) ON DELETE CASCADE,
    leg TEXT NOT NULL CHECK (leg IN ('outbound', 'inbound')),
    position INTEGER NOT NULL,
    flight_number TEXT,
    cabin_class TEXT,
    UNIQUE(fare_id, leg, position)
);

CREATE INDEX IF NOT EXISTS idx_fare_segments_fare ON fare_segments(fare_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
