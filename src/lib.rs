//! Fare-Ripple: a round-trip fare crawler
//!
//! This crate drives outbound/inbound query pairs against a travel provider's
//! GraphQL endpoint, extracts structured fare and segment data from the nested
//! responses, and hands the finished records to a persistence sink.

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod state;
pub mod storage;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use model::TaskId;

/// Main error type for Fare-Ripple operations
#[derive(Debug, Error)]
pub enum FareError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),
}

/// Errors raised by misuse of the scheduler API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task {0} is already registered")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Scheduler is closed to new tasks")]
    Closed,

    #[error("No executor registered")]
    NoExecutor,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Invalid status transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: state::TaskStatus,
        to: state::TaskStatus,
    },
}

/// Classified cause of a failed task execution
///
/// The orchestrator classifies every failure exactly once; the scheduler's
/// retry policy only looks at [`FailureKind::is_transient`].
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureKind {
    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("No fares: {0}")]
    NoResults(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl FailureKind {
    /// Returns true if the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true for the valid "search complete, zero fares" outcome
    pub fn is_empty_outcome(&self) -> bool {
        matches!(self, Self::NoResults(_))
    }

    /// Short machine-readable label, used for storage and statistics
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Transient(_) => "transient",
            Self::Parse(_) => "parse",
            Self::NoResults(_) => "no_results",
            Self::Authentication(_) => "authentication",
            Self::Rejected(_) => "rejected",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Result type alias for Fare-Ripple operations
pub type Result<T> = std::result::Result<T, FareError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlOrchestrator, ResponseExtractor, TaskScheduler};
pub use model::{CrawlTask, FareRecord, FlightSegment, PartialFareRecord, TaskParams};
pub use state::TaskStatus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_retry() {
        assert!(FailureKind::Transient("timeout".into()).is_transient());

        assert!(!FailureKind::InvalidParameters("origin".into()).is_transient());
        assert!(!FailureKind::Parse("data".into()).is_transient());
        assert!(!FailureKind::NoResults("empty".into()).is_transient());
        assert!(!FailureKind::Authentication("401".into()).is_transient());
        assert!(!FailureKind::Rejected("400".into()).is_transient());
        assert!(!FailureKind::Cancelled("shutdown".into()).is_transient());
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(FailureKind::Transient(String::new()).label(), "transient");
        assert_eq!(
            FailureKind::InvalidParameters(String::new()).label(),
            "invalid_parameters"
        );
        assert!(FailureKind::NoResults(String::new()).is_empty_outcome());
    }
}
