//! The in-flight payload from scheduler to worker.

use crate::model::{ExecutionPolicy, Schedule};
use marketbeat_core::{DispatchId, ScheduleId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A dispatch message directing a worker to run one task invocation.
///
/// The queue provides at-least-once delivery; workers tolerate duplicates
/// through log-based idempotency or idempotent upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Which task implementation to run.
    pub task_name: String,
    /// Source schedule id, for logging and policy enforcement.
    pub schedule_id: ScheduleId,
    /// Copy of the schedule label at dispatch time, for audit.
    pub schedule_name: String,
    /// Deep copy of positional parameters at firing moment.
    pub args: Vec<JsonValue>,
    /// Deep copy of keyed parameters at firing moment.
    pub kwargs: serde_json::Map<String, JsonValue>,
    /// Copied from the schedule to inform worker-side overlap logic.
    pub execution_policy: ExecutionPolicy,
    /// Unique per-dispatch id for idempotency tracing.
    pub dispatch_id: DispatchId,
}

impl DispatchMessage {
    /// Builds a dispatch message from a schedule at its firing moment.
    #[must_use]
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            task_name: schedule.task_name.clone(),
            schedule_id: schedule.id,
            schedule_name: schedule.name.clone(),
            args: schedule.args.clone(),
            kwargs: schedule.kwargs.clone(),
            execution_policy: schedule.execution_policy,
            dispatch_id: DispatchId::new(),
        }
    }

    /// Serializes the message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a message from JSON bytes. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_schedule_copies_parameters() {
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("period_type".to_string(), json!("yesterday"));

        let schedule = Schedule::new("fetch_listed_info", "0 9 * * *")
            .with_args(vec![json!("primary")])
            .with_kwargs(kwargs)
            .with_execution_policy(ExecutionPolicy::Skip);

        let msg = DispatchMessage::from_schedule(&schedule);
        assert_eq!(msg.task_name, "fetch_listed_info");
        assert_eq!(msg.schedule_id, schedule.id);
        assert_eq!(msg.schedule_name, schedule.name);
        assert_eq!(msg.args, vec![json!("primary")]);
        assert_eq!(msg.kwargs["period_type"], "yesterday");
        assert_eq!(msg.execution_policy, ExecutionPolicy::Skip);
    }

    #[test]
    fn dispatch_ids_are_unique_per_dispatch() {
        let schedule = Schedule::new("noop", "* * * * *");
        let a = DispatchMessage::from_schedule(&schedule);
        let b = DispatchMessage::from_schedule(&schedule);
        assert_ne!(a.dispatch_id, b.dispatch_id);
    }

    #[test]
    fn wire_roundtrip_ignores_unknown_fields() {
        let schedule = Schedule::new("noop", "* * * * *");
        let msg = DispatchMessage::from_schedule(&schedule);

        let mut value: serde_json::Value =
            serde_json::from_slice(&msg.to_json_bytes().unwrap()).unwrap();
        value["extra_field"] = json!("ignored");

        let parsed =
            DispatchMessage::from_json_bytes(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(parsed.dispatch_id, msg.dispatch_id);
        assert_eq!(parsed.task_name, "noop");
    }
}
