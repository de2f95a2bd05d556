//! Schedule-mutation events published on the event bus.
//!
//! Delivery is best-effort: the scheduler treats any event as "resync
//! wanted" and recovers missed events through its periodic resync.

use chrono::{DateTime, Utc};
use marketbeat_core::ScheduleId;
use serde::{Deserialize, Serialize};

/// The kind of mutation that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEventType {
    /// A schedule was created.
    Created,
    /// A schedule's fields were updated.
    Updated,
    /// A schedule was deleted.
    Deleted,
    /// A schedule was enabled.
    Enabled,
    /// A schedule was disabled.
    Disabled,
}

/// The JSON envelope carried on the mutation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    /// What happened.
    pub event_type: ScheduleEventType,
    /// Which schedule it happened to.
    pub schedule_id: ScheduleId,
    /// When the mutation was committed.
    pub timestamp: DateTime<Utc>,
}

impl ScheduleEvent {
    /// Creates an event stamped with the current instant.
    #[must_use]
    pub fn new(event_type: ScheduleEventType, schedule_id: ScheduleId) -> Self {
        Self {
            event_type,
            schedule_id,
            timestamp: Utc::now(),
        }
    }

    /// Serializes the event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an event from JSON bytes.
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

    #[test]
    fn event_wire_format() {
        let id = ScheduleId::new();
        let event = ScheduleEvent::new(ScheduleEventType::Disabled, id);

        let json: serde_json::Value =
            serde_json::from_slice(&event.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["event_type"], "disabled");
        assert_eq!(json["schedule_id"], id.as_ulid().to_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn event_roundtrip() {
        let event = ScheduleEvent::new(ScheduleEventType::Created, ScheduleId::new());
        let parsed = ScheduleEvent::from_json_bytes(&event.to_json_bytes().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = format!(
            r#"{{"event_type":"updated","schedule_id":"{}","timestamp":"2024-03-04T09:00:00Z","origin":"api"}}"#,
            ScheduleId::new().as_ulid()
        );
        let parsed = ScheduleEvent::from_json_bytes(json.as_bytes()).unwrap();
        assert_eq!(parsed.event_type, ScheduleEventType::Updated);
    }
}
