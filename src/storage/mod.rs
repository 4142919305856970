//! Storage module for persisting fare records
//!
//! This module handles everything fares are written to, including:
//! - The `Sink` trait the orchestrator hands finished records to
//! - SQLite database initialization and schema management
//! - Run tracking, one run row per crawl
//! - An in-memory sink for dry runs and tests

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use sqlite::{FareTotals, SqliteSink};
pub use traits::{Sink, StorageError, StorageResult};

use std::path::Path;

/// Opens a SQLite sink and starts a run in it
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `config_hash` - Hash of the configuration the run uses
///
/// # Returns
///
/// * `Ok(SqliteSink)` - Successfully opened storage
/// * `Err(StorageError)` - Failed to open storage
pub fn open_storage(path: &Path, config_hash: &str) -> StorageResult<SqliteSink> {
    SqliteSink::new(path, config_hash)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
