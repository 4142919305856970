//! In-memory sink

use crate::model::FareRecord;
use crate::storage::traits::{valid_records, Sink, StorageError, StorageResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::Span;

/// Keeps persisted records in memory
///
/// Used by tests and by callers that consume fares themselves. A failing
/// sink can be requested to exercise error paths.
pub struct MemorySink {
    records: Mutex<Vec<FareRecord>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    span: Span,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            span: tracing::info_span!("memory_sink"),
        }
    }

    /// A sink whose every `persist` call fails
    pub fn failing() -> Self {
        let sink = Self::new();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copies of everything persisted so far
    pub async fn records(&self) -> Vec<FareRecord> {
        self.records.lock().await.clone()
    }

    /// Number of `persist` calls, including failed and empty ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn persist(&self, records: &[FareRecord]) -> StorageResult<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Database("memory sink set to fail".to_string()));
        }

        let valid = valid_records(records, &self.span);
        let written = valid.len();
        self.records
            .lock()
            .await
            .extend(valid.into_iter().cloned());

        Ok(written)
    }
}
