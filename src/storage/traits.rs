//! Storage traits and error types
//!
//! This module defines the sink interface fare records are handed to, and
//! the associated error types.

use crate::model::{FareRecord, RecordError};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for finished fare records
///
/// Implementations must be safe to call from several workers at once.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Persists a batch of records
    ///
    /// Records failing `FareRecord::validate` are skipped with a warning and
    /// do not fail the batch.
    ///
    /// # Returns
    ///
    /// The number of records written
    async fn persist(&self, records: &[FareRecord]) -> StorageResult<usize>;
}

/// Splits a batch into records a sink may write, logging the rest
pub(crate) fn valid_records<'a>(
    records: &'a [FareRecord],
    span: &tracing::Span,
) -> Vec<&'a FareRecord> {
    records
        .iter()
        .filter(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    parent: span,
                    search_id = record.search_id.as_deref().unwrap_or("-"),
                    "Skipping invalid fare record: {}",
                    e
                );
                false
            }
        })
        .collect()
}
