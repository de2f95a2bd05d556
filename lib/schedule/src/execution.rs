//! Per-invocation execution records.

use chrono::{DateTime, Utc};
use marketbeat_core::{ExecutionId, ScheduleId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Status of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Worker has begun execution.
    Running,
    /// Execution finished successfully.
    Success,
    /// Execution terminated with an error.
    Failed,
    /// Execution was skipped by policy.
    Skipped,
}

impl ExecutionStatus {
    /// Returns whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns the status's wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One record per task invocation.
///
/// Once a terminal status is written the record is immutable; the mutators
/// here are first-writer-wins and the stores enforce the same rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Unique identifier, assigned on creation.
    pub id: ExecutionId,
    /// Originating schedule, if any (None for ad-hoc invocations).
    pub schedule_id: Option<ScheduleId>,
    /// Copy of the task identifier at dispatch time.
    pub task_name: String,
    /// When the worker began execution.
    pub started_at: DateTime<Utc>,
    /// When execution terminated. None while running.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Outcome summary (e.g. fetched/saved counts).
    pub result: Option<JsonValue>,
    /// Error detail on failure.
    pub error_message: Option<String>,
}

impl ExecutionLog {
    /// Creates a running record stamped with the current instant.
    #[must_use]
    pub fn begin(task_name: impl Into<String>, schedule_id: Option<ScheduleId>) -> Self {
        Self {
            id: ExecutionId::new(),
            schedule_id,
            task_name: task_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            result: None,
            error_message: None,
        }
    }

    /// Returns whether the record has reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Marks the execution successful. No-op once terminal.
    pub fn complete(&mut self, result: JsonValue) {
        if self.is_finished() {
            return;
        }
        self.status = ExecutionStatus::Success;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    /// Marks the execution failed. No-op once terminal.
    pub fn fail(&mut self, error_message: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.finished_at = Some(Utc::now());
    }

    /// Marks the execution skipped by policy. No-op once terminal.
    pub fn skip(&mut self) {
        if self.is_finished() {
            return;
        }
        self.status = ExecutionStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn begin_creates_running_record() {
        let log = ExecutionLog::begin("fetch_listed_info", Some(ScheduleId::new()));
        assert_eq!(log.status, ExecutionStatus::Running);
        assert!(log.finished_at.is_none());
        assert!(!log.is_finished());
    }

    #[test]
    fn complete_sets_terminal_state() {
        let mut log = ExecutionLog::begin("noop", None);
        log.complete(json!({"fetched": 10, "saved": 10}));

        assert_eq!(log.status, ExecutionStatus::Success);
        assert!(log.finished_at.unwrap() >= log.started_at);
        assert_eq!(log.result.as_ref().unwrap()["saved"], 10);
    }

    #[test]
    fn terminal_state_is_first_writer_wins() {
        let mut log = ExecutionLog::begin("noop", None);
        log.fail("boom");
        let finished = log.finished_at;

        log.complete(json!({"ignored": true}));
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert_eq!(log.finished_at, finished);
        assert!(log.result.is_none());

        log.skip();
        assert_eq!(log.status, ExecutionStatus::Failed);
    }

    #[test]
    fn status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Skipped,
        ] {
            let parsed: ExecutionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
