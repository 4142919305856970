//! Crawl tasks and their lifecycle bookkeeping

use crate::model::FareRecord;
use crate::state::TaskStatus;
use crate::{FailureKind, SchedulerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier of a crawl task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Query parameters of a task (origin, destination, dates, cabin, ...)
///
/// Kept as a plain string map; the orchestrator is responsible for parsing
/// and validating it before any request goes out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams(BTreeMap<String, String>);

impl TaskParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the trimmed value for `key`, treating blank values as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Timing and outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureKind>,
}

/// Failure recorded on a terminally failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// A unit of crawl work and everything the scheduler knows about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: TaskId,
    pub params: TaskParams,
    pub status: TaskStatus,

    /// Number of times the executor has been invoked
    pub attempts: u32,

    /// Set on every transition into Running
    pub started_at: Option<DateTime<Utc>>,

    /// Set on every transition out of Running
    pub finished_at: Option<DateTime<Utc>>,

    pub history: Vec<AttemptRecord>,
    pub result: Vec<FareRecord>,
    pub error: Option<TaskError>,
}

impl CrawlTask {
    /// Creates a queued task
    pub fn new(id: impl Into<TaskId>, params: TaskParams) -> Self {
        Self {
            id: id.into(),
            params,
            status: TaskStatus::Queued,
            attempts: 0,
            started_at: None,
            finished_at: None,
            history: Vec::new(),
            result: Vec::new(),
            error: None,
        }
    }

    /// Creates a queued task with a generated identifier
    pub fn with_generated_id(params: TaskParams) -> Self {
        Self::new(TaskId::generate(), params)
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                task: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn close_attempt(&mut self, now: DateTime<Utc>, failure: Option<FailureKind>) {
        self.finished_at = Some(now);
        if let Some(last) = self.history.last_mut() {
            last.finished_at = Some(now);
            last.failure = failure;
        }
    }

    /// Queued -> Running; starts a new attempt
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Running)?;
        self.attempts += 1;
        self.started_at = Some(now);
        self.finished_at = None;
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            started_at: now,
            finished_at: None,
            failure: None,
        });
        Ok(())
    }

    /// Running -> Succeeded
    pub fn mark_succeeded(
        &mut self,
        records: Vec<FareRecord>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Succeeded)?;
        self.close_attempt(now, None);
        self.result = records;
        self.error = None;
        Ok(())
    }

    /// Running -> Retrying
    pub fn mark_retrying(
        &mut self,
        failure: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Retrying)?;
        self.close_attempt(now, Some(failure));
        Ok(())
    }

    /// Retrying -> Queued, once the backoff has elapsed
    pub fn mark_requeued(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Queued)
    }

    /// Running, Retrying or Queued -> Failed, recording the cause
    pub fn mark_failed(
        &mut self,
        failure: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let was_running = self.status == TaskStatus::Running;
        self.transition(TaskStatus::Failed)?;
        if was_running {
            self.close_attempt(now, Some(failure.clone()));
        }
        self.error = Some(TaskError {
            kind: failure,
            attempts: self.attempts,
            failed_at: now,
        });
        Ok(())
    }

    /// Returns the result only once the task has succeeded
    pub fn finished_result(&self) -> Option<&[FareRecord]> {
        match self.status {
            TaskStatus::Succeeded => Some(&self.result),
            _ => None,
        }
    }
}
