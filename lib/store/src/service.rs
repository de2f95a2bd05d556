//! The mutation façade used by the schedule-management API.
//!
//! Every successful write publishes the matching mutation event on the bus.
//! Event publication failure never rolls back the write: the scheduler's
//! periodic resync is the correctness backstop, the event only shortens the
//! reaction latency.

use crate::error::StoreError;
use crate::schedule_store::{ScheduleFilter, ScheduleStore};
use marketbeat_bus::EventBus;
use marketbeat_core::{Result, ScheduleId};
use marketbeat_schedule::{Schedule, ScheduleEvent, ScheduleEventType};
use std::sync::Arc;

/// Schedule mutation service: store writes plus bus notification.
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    bus: Arc<dyn EventBus>,
}

impl ScheduleService {
    /// Creates a service over a store and a bus.
    #[must_use]
    pub fn new(store: Arc<dyn ScheduleStore>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, bus }
    }

    /// Creates a schedule and announces it.
    pub async fn create(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        let created = self.store.create(schedule).await?;
        self.notify(ScheduleEventType::Created, created.id).await;
        Ok(created)
    }

    /// Updates a schedule and announces it.
    pub async fn update(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        let updated = self.store.update(schedule).await?;
        self.notify(ScheduleEventType::Updated, updated.id).await;
        Ok(updated)
    }

    /// Deletes a schedule, announcing only when something was deleted.
    pub async fn delete(&self, id: ScheduleId) -> Result<bool, StoreError> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.notify(ScheduleEventType::Deleted, id).await;
        }
        Ok(deleted)
    }

    /// Enables a schedule and announces it.
    pub async fn enable(&self, id: ScheduleId) -> Result<Schedule, StoreError> {
        let schedule = self.store.set_enabled(id, true).await?;
        self.notify(ScheduleEventType::Enabled, id).await;
        Ok(schedule)
    }

    /// Disables a schedule and announces it.
    pub async fn disable(&self, id: ScheduleId) -> Result<Schedule, StoreError> {
        let schedule = self.store.set_enabled(id, false).await?;
        self.notify(ScheduleEventType::Disabled, id).await;
        Ok(schedule)
    }

    /// Fetches a schedule by id.
    pub async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self.store.get(id).await?)
    }

    /// Fetches a schedule by name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self.store.get_by_name(name).await?)
    }

    /// Lists schedules matching the filter.
    pub async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.store.list(filter).await?)
    }

    async fn notify(&self, event_type: ScheduleEventType, schedule_id: ScheduleId) {
        let event = ScheduleEvent::new(event_type, schedule_id);
        if let Err(e) = self.bus.publish(&event).await {
            tracing::warn!(
                error = %e,
                schedule_id = %schedule_id,
                "Failed to publish mutation event; periodic resync will catch up"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScheduleStore;
    use marketbeat_bus::MemoryEventBus;

    fn service_with_bus() -> (ScheduleService, Arc<MemoryEventBus>) {
        let bus = Arc::new(MemoryEventBus::new());
        let service = ScheduleService::new(
            Arc::new(MemoryScheduleStore::new()),
            Arc::clone(&bus) as Arc<dyn EventBus>,
        );
        (service, bus)
    }

    #[tokio::test]
    async fn create_publishes_created_event() {
        let (service, bus) = service_with_bus();
        let mut sub = bus.subscribe().await.unwrap();

        let created = service
            .create(Schedule::new("noop", "* * * * *"))
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, ScheduleEventType::Created);
        assert_eq!(event.schedule_id, created.id);
    }

    #[tokio::test]
    async fn disable_publishes_disabled_event() {
        let (service, bus) = service_with_bus();
        let created = service
            .create(Schedule::new("noop", "* * * * *"))
            .await
            .unwrap();

        let mut sub = bus.subscribe().await.unwrap();
        let disabled = service.disable(created.id).await.unwrap();
        assert!(!disabled.enabled);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, ScheduleEventType::Disabled);
    }

    #[tokio::test]
    async fn delete_of_missing_id_publishes_nothing() {
        let (service, bus) = service_with_bus();
        let mut sub = bus.subscribe().await.unwrap();

        let deleted = service.delete(ScheduleId::new()).await.unwrap();
        assert!(!deleted);

        // Subsequent create proves the channel stayed silent until now.
        let created = service
            .create(Schedule::new("noop", "* * * * *"))
            .await
            .unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.schedule_id, created.id);
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_before_any_event() {
        let (service, _bus) = service_with_bus();
        let result = service.create(Schedule::new("noop", "61 * * * *")).await;
        assert!(result.is_err());
    }
}
