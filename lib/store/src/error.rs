//! Error types for the store crate.

use marketbeat_core::{ExecutionId, ScheduleId};
use std::fmt;

/// Errors from schedule and execution-log persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Schedule not found.
    ScheduleNotFound { id: ScheduleId },
    /// Execution log not found.
    ExecutionNotFound { id: ExecutionId },
    /// Cron expression rejected at write time.
    InvalidCron { expression: String, reason: String },
    /// Backing store operation failed.
    Backend { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScheduleNotFound { id } => write!(f, "schedule not found: {id}"),
            Self::ExecutionNotFound { id } => write!(f, "execution log not found: {id}"),
            Self::InvalidCron { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::Backend { message } => write!(f, "store operation failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let id = ScheduleId::new();
        let err = StoreError::ScheduleNotFound { id };
        assert!(err.to_string().contains("schedule not found"));
    }

    #[test]
    fn invalid_cron_display() {
        let err = StoreError::InvalidCron {
            expression: "x".to_string(),
            reason: "expected 5 fields".to_string(),
        };
        assert!(err.to_string().contains("5 fields"));
    }
}
