//! The execution log store port and its Postgres implementation.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketbeat_core::{ExecutionId, ScheduleId};
use marketbeat_schedule::{ExecutionLog, ExecutionStatus};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Predicates for recent-execution queries.
#[derive(Debug, Clone)]
pub struct ExecutionLogFilter {
    /// Match on originating schedule.
    pub schedule_id: Option<ScheduleId>,
    /// Match on status.
    pub status: Option<ExecutionStatus>,
    /// Maximum records returned, newest first.
    pub limit: i64,
}

impl Default for ExecutionLogFilter {
    fn default() -> Self {
        Self {
            schedule_id: None,
            status: None,
            limit: 50,
        }
    }
}

impl ExecutionLogFilter {
    /// Restricts to one schedule.
    #[must_use]
    pub fn for_schedule(schedule_id: ScheduleId) -> Self {
        Self {
            schedule_id: Some(schedule_id),
            ..Self::default()
        }
    }

    /// Restricts to one status.
    #[must_use]
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the record cap.
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Returns whether a log matches all predicates.
    #[must_use]
    pub fn matches(&self, log: &ExecutionLog) -> bool {
        if let Some(schedule_id) = self.schedule_id {
            if log.schedule_id != Some(schedule_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if log.status != status {
                return false;
            }
        }
        true
    }
}

/// Append-only per-task execution records with status transitions.
///
/// `complete`, `fail`, and `mark_skipped` are idempotent with respect to a
/// terminal state: a second terminal write to the same id is a no-op
/// (first-writer-wins).
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Creates a running record and returns its id.
    async fn begin(
        &self,
        task_name: &str,
        schedule_id: Option<ScheduleId>,
    ) -> Result<ExecutionId, StoreError>;

    /// Terminates the record as successful with an outcome summary.
    async fn complete(&self, id: ExecutionId, result: JsonValue) -> Result<(), StoreError>;

    /// Terminates the record as failed with an error message.
    async fn fail(&self, id: ExecutionId, error_message: &str) -> Result<(), StoreError>;

    /// Terminates the record as skipped by policy.
    async fn mark_skipped(&self, id: ExecutionId) -> Result<(), StoreError>;

    /// Fetches a record by id.
    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionLog>, StoreError>;

    /// Lists records matching the filter, newest first.
    async fn list_recent(&self, filter: &ExecutionLogFilter)
    -> Result<Vec<ExecutionLog>, StoreError>;
}

/// Row type for execution log queries.
#[derive(FromRow)]
struct ExecutionLogRow {
    id: String,
    schedule_id: Option<String>,
    task_name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    result: Option<JsonValue>,
    error_message: Option<String>,
}

impl ExecutionLogRow {
    fn try_into_log(self) -> Result<ExecutionLog, StoreError> {
        let id = ExecutionId::from_str(&self.id).map_err(|e| StoreError::Backend {
            message: format!("invalid execution id '{}': {e}", self.id),
        })?;
        let schedule_id = self
            .schedule_id
            .as_deref()
            .map(ScheduleId::from_str)
            .transpose()
            .map_err(|e| StoreError::Backend {
                message: format!("invalid schedule id reference: {e}"),
            })?;
        let status = ExecutionStatus::from_str(&self.status).map_err(|e| StoreError::Backend {
            message: format!("invalid status column: {e}"),
        })?;

        Ok(ExecutionLog {
            id,
            schedule_id,
            task_name: self.task_name,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status,
            result: self.result,
            error_message: self.error_message,
        })
    }
}

const LOG_COLUMNS: &str =
    "id, schedule_id, task_name, started_at, finished_at, status, result, error_message";

/// Postgres-backed execution log store.
pub struct PgExecutionLogStore {
    pool: PgPool,
}

impl PgExecutionLogStore {
    /// Creates a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes a terminal state, guarded so the first terminal write wins.
    async fn terminate(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        result: Option<JsonValue>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE execution_logs
            SET status = $2, result = $3, error_message = $4, finished_at = now()
            WHERE id = $1 AND finished_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ExecutionLogStore for PgExecutionLogStore {
    async fn begin(
        &self,
        task_name: &str,
        schedule_id: Option<ScheduleId>,
    ) -> Result<ExecutionId, StoreError> {
        let log = ExecutionLog::begin(task_name, schedule_id);

        sqlx::query(
            r#"
            INSERT INTO execution_logs (id, schedule_id, task_name, started_at, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.schedule_id.map(|id| id.to_string()))
        .bind(&log.task_name)
        .bind(log.started_at)
        .bind(log.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(log.id)
    }

    async fn complete(&self, id: ExecutionId, result: JsonValue) -> Result<(), StoreError> {
        self.terminate(id, ExecutionStatus::Success, Some(result), None)
            .await
    }

    async fn fail(&self, id: ExecutionId, error_message: &str) -> Result<(), StoreError> {
        self.terminate(id, ExecutionStatus::Failed, None, Some(error_message))
            .await
    }

    async fn mark_skipped(&self, id: ExecutionId) -> Result<(), StoreError> {
        self.terminate(id, ExecutionStatus::Skipped, None, None)
            .await
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionLog>, StoreError> {
        let row: Option<ExecutionLogRow> = sqlx::query_as(&format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_log()?)),
            None => Ok(None),
        }
    }

    async fn list_recent(
        &self,
        filter: &ExecutionLogFilter,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let rows: Vec<ExecutionLogRow> = sqlx::query_as(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM execution_logs
            WHERE ($1::text IS NULL OR schedule_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY started_at DESC
            LIMIT $3
            "#
        ))
        .bind(filter.schedule_id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutionLogRow::try_into_log).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_schedule_and_status() {
        let schedule_id = ScheduleId::new();
        let filter =
            ExecutionLogFilter::for_schedule(schedule_id).with_status(ExecutionStatus::Failed);

        let mut hit = ExecutionLog::begin("noop", Some(schedule_id));
        hit.fail("boom");
        assert!(filter.matches(&hit));

        let mut wrong_status = ExecutionLog::begin("noop", Some(schedule_id));
        wrong_status.complete(serde_json::json!({}));
        assert!(!filter.matches(&wrong_status));

        let wrong_schedule = ExecutionLog::begin("noop", Some(ScheduleId::new()));
        assert!(!filter.matches(&wrong_schedule));
    }

    #[test]
    fn default_filter_matches_everything() {
        let filter = ExecutionLogFilter::default();
        let log = ExecutionLog::begin("noop", None);
        assert!(filter.matches(&log));
        assert_eq!(filter.limit, 50);
    }
}
