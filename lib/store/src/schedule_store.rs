//! The schedule store port and its Postgres implementation.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketbeat_core::ScheduleId;
use marketbeat_schedule::{CronExpr, ExecutionPolicy, Schedule};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Combined predicates for listing schedules.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    /// Match on the enabled flag.
    pub enabled: Option<bool>,
    /// Match on category.
    pub category: Option<String>,
    /// Match schedules carrying any of these tags.
    pub tags_any: Vec<String>,
    /// Match on task name.
    pub task_name: Option<String>,
    /// Page size; None returns everything.
    pub limit: Option<i64>,
    /// Page offset.
    pub offset: i64,
}

impl ScheduleFilter {
    /// Matches only enabled schedules.
    #[must_use]
    pub fn enabled_only() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    /// Restricts to a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restricts to schedules carrying any of the given tags.
    #[must_use]
    pub fn with_tags_any(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags_any = tags.into_iter().collect();
        self
    }

    /// Restricts to a task name.
    #[must_use]
    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    /// Sets the page.
    #[must_use]
    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Returns whether a schedule matches all predicates.
    #[must_use]
    pub fn matches(&self, schedule: &Schedule) -> bool {
        if let Some(enabled) = self.enabled {
            if schedule.enabled != enabled {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if schedule.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(task_name) = &self.task_name {
            if schedule.task_name != *task_name {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| schedule.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// CRUD over persisted schedule records.
///
/// Writes are atomic per schedule; after a successful write, reading the
/// same id yields the new state. The scheduler only reads through this
/// port; all mutation goes through [`crate::ScheduleService`].
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Persists a new schedule, validating its cron expression.
    async fn create(&self, schedule: Schedule) -> Result<Schedule, StoreError>;

    /// Fetches a schedule by id.
    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError>;

    /// Fetches the first schedule with the given name.
    async fn get_by_name(&self, name: &str) -> Result<Option<Schedule>, StoreError>;

    /// Lists schedules matching the filter, oldest first.
    async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, StoreError>;

    /// Replaces a schedule's fields, validating the cron expression and
    /// bumping `updated_at`. Returns the stored state.
    async fn update(&self, schedule: Schedule) -> Result<Schedule, StoreError>;

    /// Deletes a schedule. Returns false (not an error) when the id does
    /// not exist.
    async fn delete(&self, id: ScheduleId) -> Result<bool, StoreError>;

    /// Flips the enabled gate, bumping `updated_at`. Returns the stored state.
    async fn set_enabled(&self, id: ScheduleId, enabled: bool) -> Result<Schedule, StoreError>;
}

/// Row type for schedule queries.
#[derive(FromRow)]
struct ScheduleRow {
    id: String,
    name: String,
    task_name: String,
    cron_expression: String,
    enabled: bool,
    args: serde_json::Value,
    kwargs: serde_json::Value,
    description: Option<String>,
    category: Option<String>,
    tags: serde_json::Value,
    execution_policy: String,
    auto_generated_name: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ScheduleRow {
    fn try_into_schedule(self) -> Result<Schedule, StoreError> {
        let id = ScheduleId::from_str(&self.id).map_err(|e| StoreError::Backend {
            message: format!("invalid schedule id '{}': {e}", self.id),
        })?;
        let args: Vec<serde_json::Value> =
            serde_json::from_value(self.args).map_err(|e| StoreError::Backend {
                message: format!("invalid args column: {e}"),
            })?;
        let kwargs: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(self.kwargs).map_err(|e| StoreError::Backend {
                message: format!("invalid kwargs column: {e}"),
            })?;
        let tags: std::collections::BTreeSet<String> =
            serde_json::from_value(self.tags).map_err(|e| StoreError::Backend {
                message: format!("invalid tags column: {e}"),
            })?;
        let execution_policy =
            ExecutionPolicy::from_str(&self.execution_policy).map_err(|e| StoreError::Backend {
                message: format!("invalid execution_policy column: {e}"),
            })?;

        Ok(Schedule {
            id,
            name: self.name,
            task_name: self.task_name,
            cron_expression: self.cron_expression,
            enabled: self.enabled,
            args,
            kwargs,
            description: self.description,
            category: self.category,
            tags,
            execution_policy,
            auto_generated_name: self.auto_generated_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SCHEDULE_COLUMNS: &str = "id, name, task_name, cron_expression, enabled, args, kwargs, \
     description, category, tags, execution_policy, auto_generated_name, created_at, updated_at";

/// Postgres-backed schedule store.
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    /// Creates a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn validate_cron(expression: &str) -> Result<(), StoreError> {
        CronExpr::validate(expression).map_err(|e| StoreError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn create(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        Self::validate_cron(&schedule.cron_expression)?;

        sqlx::query(
            r#"
            INSERT INTO schedules (id, name, task_name, cron_expression, enabled, args, kwargs,
                                   description, category, tags, execution_policy,
                                   auto_generated_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.name)
        .bind(&schedule.task_name)
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(serde_json::Value::from(schedule.args.clone()))
        .bind(serde_json::Value::Object(schedule.kwargs.clone()))
        .bind(&schedule.description)
        .bind(&schedule.category)
        .bind(serde_json::json!(schedule.tags))
        .bind(schedule.execution_policy.as_str())
        .bind(schedule.auto_generated_name)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(schedule)
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_schedule()?)),
            None => Ok(None),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Schedule>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE name = $1 ORDER BY created_at LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_schedule()?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM schedules
            WHERE ($1::boolean IS NULL OR enabled = $1)
              AND ($2::text IS NULL OR category = $2)
              AND ($3::text IS NULL OR task_name = $3)
              AND (cardinality($4::text[]) = 0 OR tags ?| $4)
            ORDER BY created_at
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(filter.enabled)
        .bind(&filter.category)
        .bind(&filter.task_name)
        .bind(&filter.tags_any)
        .bind(filter.limit.unwrap_or(i64::MAX))
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScheduleRow::try_into_schedule).collect()
    }

    async fn update(&self, mut schedule: Schedule) -> Result<Schedule, StoreError> {
        Self::validate_cron(&schedule.cron_expression)?;
        schedule.touch();

        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET name = $2, task_name = $3, cron_expression = $4, enabled = $5, args = $6,
                kwargs = $7, description = $8, category = $9, tags = $10,
                execution_policy = $11, auto_generated_name = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.name)
        .bind(&schedule.task_name)
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(serde_json::Value::from(schedule.args.clone()))
        .bind(serde_json::Value::Object(schedule.kwargs.clone()))
        .bind(&schedule.description)
        .bind(&schedule.category)
        .bind(serde_json::json!(schedule.tags))
        .bind(schedule.execution_policy.as_str())
        .bind(schedule.auto_generated_name)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ScheduleNotFound { id: schedule.id });
        }

        Ok(schedule)
    }

    async fn delete(&self, id: ScheduleId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_enabled(&self, id: ScheduleId, enabled: bool) -> Result<Schedule, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE schedules
            SET enabled = $2, updated_at = now()
            WHERE id = $1
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id.to_string())
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => r.try_into_schedule(),
            None => Err(StoreError::ScheduleNotFound { id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketbeat_schedule::Schedule;

    #[test]
    fn filter_matches_enabled() {
        let filter = ScheduleFilter::enabled_only();
        let enabled = Schedule::new("noop", "* * * * *");
        let disabled = Schedule::new("noop", "* * * * *").with_enabled(false);

        assert!(filter.matches(&enabled));
        assert!(!filter.matches(&disabled));
    }

    #[test]
    fn filter_matches_category_and_task() {
        let filter = ScheduleFilter::default()
            .with_category("market_data")
            .with_task_name("fetch_listed_info");

        let hit = Schedule::new("fetch_listed_info", "0 9 * * *").with_category("market_data");
        let wrong_category =
            Schedule::new("fetch_listed_info", "0 9 * * *").with_category("reports");
        let wrong_task = Schedule::new("noop", "0 9 * * *").with_category("market_data");

        assert!(filter.matches(&hit));
        assert!(!filter.matches(&wrong_category));
        assert!(!filter.matches(&wrong_task));
    }

    #[test]
    fn filter_matches_any_tag() {
        let filter =
            ScheduleFilter::default().with_tags_any(["daily".to_string(), "prices".to_string()]);

        let tagged = Schedule::new("noop", "0 9 * * *")
            .with_tags(["listed".to_string(), "daily".to_string()]);
        let untagged = Schedule::new("noop", "0 9 * * *");

        assert!(filter.matches(&tagged));
        assert!(!filter.matches(&untagged));
    }
}
