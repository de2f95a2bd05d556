//! In-process store implementations.
//!
//! Back the scenario tests and local single-process runs with the same
//! contracts as the Postgres stores, including write-time cron validation
//! and first-writer-wins terminal log states.

use crate::error::StoreError;
use crate::execution_store::{ExecutionLogFilter, ExecutionLogStore};
use crate::schedule_store::{ScheduleFilter, ScheduleStore};
use async_trait::async_trait;
use marketbeat_core::{ExecutionId, ScheduleId};
use marketbeat_schedule::{CronExpr, ExecutionLog, ExecutionStatus, Schedule};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

/// HashMap-backed schedule store.
pub struct MemoryScheduleStore {
    schedules: Mutex<HashMap<ScheduleId, Schedule>>,
}

impl MemoryScheduleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
        }
    }

    fn validate_cron(expression: &str) -> Result<(), StoreError> {
        CronExpr::validate(expression).map_err(|e| StoreError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for MemoryScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn create(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        Self::validate_cron(&schedule.cron_expression)?;
        self.schedules
            .lock()
            .unwrap()
            .insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Schedule>, StoreError> {
        let schedules = self.schedules.lock().unwrap();
        let mut matches: Vec<&Schedule> = schedules.values().filter(|s| s.name == name).collect();
        matches.sort_by_key(|s| s.created_at);
        Ok(matches.first().map(|s| (*s).clone()))
    }

    async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        let schedules = self.schedules.lock().unwrap();
        let mut matched: Vec<Schedule> = schedules
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let matched: Vec<Schedule> = matched.into_iter().skip(offset).collect();
        match filter.limit {
            Some(limit) => Ok(matched
                .into_iter()
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect()),
            None => Ok(matched),
        }
    }

    async fn update(&self, mut schedule: Schedule) -> Result<Schedule, StoreError> {
        Self::validate_cron(&schedule.cron_expression)?;
        let mut schedules = self.schedules.lock().unwrap();
        if !schedules.contains_key(&schedule.id) {
            return Err(StoreError::ScheduleNotFound { id: schedule.id });
        }
        schedule.touch();
        schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn delete(&self, id: ScheduleId) -> Result<bool, StoreError> {
        Ok(self.schedules.lock().unwrap().remove(&id).is_some())
    }

    async fn set_enabled(&self, id: ScheduleId, enabled: bool) -> Result<Schedule, StoreError> {
        let mut schedules = self.schedules.lock().unwrap();
        let Some(schedule) = schedules.get_mut(&id) else {
            return Err(StoreError::ScheduleNotFound { id });
        };
        schedule.enabled = enabled;
        schedule.touch();
        Ok(schedule.clone())
    }
}

/// HashMap-backed execution log store.
pub struct MemoryExecutionLogStore {
    logs: Mutex<HashMap<ExecutionId, ExecutionLog>>,
}

impl MemoryExecutionLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of records with the given status (test helper).
    #[must_use]
    pub fn count_with_status(&self, status: ExecutionStatus) -> usize {
        self.logs
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.status == status)
            .count()
    }
}

impl Default for MemoryExecutionLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryExecutionLogStore {
    async fn begin(
        &self,
        task_name: &str,
        schedule_id: Option<ScheduleId>,
    ) -> Result<ExecutionId, StoreError> {
        let log = ExecutionLog::begin(task_name, schedule_id);
        let id = log.id;
        self.logs.lock().unwrap().insert(id, log);
        Ok(id)
    }

    async fn complete(&self, id: ExecutionId, result: JsonValue) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap();
        let Some(log) = logs.get_mut(&id) else {
            return Err(StoreError::ExecutionNotFound { id });
        };
        log.complete(result);
        Ok(())
    }

    async fn fail(&self, id: ExecutionId, error_message: &str) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap();
        let Some(log) = logs.get_mut(&id) else {
            return Err(StoreError::ExecutionNotFound { id });
        };
        log.fail(error_message);
        Ok(())
    }

    async fn mark_skipped(&self, id: ExecutionId) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap();
        let Some(log) = logs.get_mut(&id) else {
            return Err(StoreError::ExecutionNotFound { id });
        };
        log.skip();
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionLog>, StoreError> {
        Ok(self.logs.lock().unwrap().get(&id).cloned())
    }

    async fn list_recent(
        &self,
        filter: &ExecutionLogFilter,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let logs = self.logs.lock().unwrap();
        let mut matched: Vec<ExecutionLog> = logs
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matched.truncate(usize::try_from(filter.limit).unwrap_or(usize::MAX));
        Ok(matched)
    }
}
