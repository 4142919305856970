/// Task status definitions for tracking crawl progress
///
/// This module defines every state a task can be in while the scheduler owns it.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    // ===== Active States =====
    /// Task is waiting in the queue
    Queued,

    /// Task holds a scheduler slot and its executor is running
    Running,

    /// Task failed transiently and is waiting out its backoff
    Retrying,

    // ===== Terminal States =====
    /// Executor returned a result (possibly empty)
    Succeeded,

    /// Task failed permanently or exhausted its attempts
    Failed,
}

impl TaskStatus {
    /// Returns true if this is a terminal status (no further processing)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the task may still be executed
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// Queued -> Failed only happens when the scheduler is shut down.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Retrying)
                | (Self::Running, Self::Failed)
                | (Self::Retrying, Self::Queued)
                | (Self::Retrying, Self::Failed)
        )
    }

    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "retrying" => Some(Self::Retrying),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Running,
            Self::Retrying,
            Self::Succeeded,
            Self::Failed,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());

        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_is_active() {
        assert!(TaskStatus::Queued.is_active());
        assert!(TaskStatus::Retrying.is_active());
        assert!(!TaskStatus::Failed.is_active());
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Retrying));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Retrying.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Retrying.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_terminal_states_never_move() {
        for terminal in [TaskStatus::Succeeded, TaskStatus::Failed] {
            for next in TaskStatus::all_states() {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_queued_cannot_skip_running() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Succeeded));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Retrying));
        assert!(!TaskStatus::Retrying.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_from_db_string() {
        assert_eq!(TaskStatus::from_db_string("queued"), Some(TaskStatus::Queued));
        assert_eq!(
            TaskStatus::from_db_string("succeeded"),
            Some(TaskStatus::Succeeded)
        );
        assert_eq!(TaskStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TaskStatus::Retrying), "retrying");
        assert_eq!(format!("{}", TaskStatus::Failed), "failed");
    }
}
