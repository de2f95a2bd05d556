//! Event bus and dispatch queue ports for marketbeat.
//!
//! This crate provides:
//!
//! - **Event bus**: Pub/sub channel carrying schedule-mutation events
//! - **Dispatch queue**: Durable work queue between scheduler and workers
//! - **NATS implementations**: Core pub/sub for events, JetStream for dispatch
//! - **Memory implementations**: In-process doubles for tests and local runs

pub mod error;
pub mod event_bus;
pub mod memory;
pub mod nats;
pub mod queue;

pub use error::{BusError, QueueError};
pub use event_bus::{EventBus, EventSubscription};
pub use memory::{MemoryDispatchQueue, MemoryEventBus};
pub use nats::{NatsConfig, NatsDispatchQueue, NatsEventBus};
pub use queue::{Delivery, DispatchConsumer, DispatchQueue};
