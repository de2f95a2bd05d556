//! The schedule-mutation pub/sub port.
//!
//! The store publishes without knowing subscribers; the scheduler subscribes
//! without knowing publishers. Delivery is best-effort: missed events are
//! recovered by the scheduler's periodic resync.

use crate::error::BusError;
use async_trait::async_trait;
use marketbeat_schedule::ScheduleEvent;

/// Pub/sub channel carrying schedule-mutation events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a mutation event on the channel.
    async fn publish(&self, event: &ScheduleEvent) -> Result<(), BusError>;

    /// Opens a subscription to the channel.
    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, BusError>;
}

/// A live subscription to the mutation channel.
#[async_trait]
pub trait EventSubscription: Send {
    /// Receives the next event.
    ///
    /// Returns `None` when the subscription is closed; malformed payloads are
    /// dropped with a warning rather than surfaced (the scheduler treats any
    /// event as "resync wanted", so an undecodable event carries no extra
    /// information anyway).
    async fn recv(&mut self) -> Option<ScheduleEvent>;
}
