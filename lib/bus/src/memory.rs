//! In-process bus implementations.
//!
//! Used by scenario tests and local single-process runs. The memory queue
//! models enqueue/consume/ack ordering but not broker redelivery; crash
//! redelivery semantics belong to the JetStream implementation.

use crate::error::{BusError, QueueError};
use crate::event_bus::{EventBus, EventSubscription};
use crate::queue::{Acknowledge, Delivery, DispatchConsumer, DispatchQueue};
use async_trait::async_trait;
use marketbeat_schedule::{DispatchMessage, ScheduleEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};

/// Broadcast-backed event bus.
pub struct MemoryEventBus {
    tx: broadcast::Sender<ScheduleEvent>,
}

impl MemoryEventBus {
    /// Creates a bus with a bounded fan-out buffer.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &ScheduleEvent) -> Result<(), BusError> {
        // No subscribers is not an error: delivery is best-effort.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, BusError> {
        Ok(Box::new(MemoryEventSubscription {
            rx: self.tx.subscribe(),
        }))
    }
}

struct MemoryEventSubscription {
    rx: broadcast::Receiver<ScheduleEvent>,
}

#[async_trait]
impl EventSubscription for MemoryEventSubscription {
    async fn recv(&mut self) -> Option<ScheduleEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // A lagged subscriber lost events; the next event still
                // means "resync wanted", so just keep receiving.
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct QueueInner {
    items: Mutex<VecDeque<DispatchMessage>>,
    notify: Notify,
    fail_enqueue: AtomicBool,
}

/// In-memory dispatch queue with failure injection for tests.
#[derive(Clone)]
pub struct MemoryDispatchQueue {
    inner: Arc<QueueInner>,
}

impl MemoryDispatchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                fail_enqueue: AtomicBool::new(false),
            }),
        }
    }

    /// Makes subsequent enqueues fail (or succeed again).
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.inner.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of queued, unconsumed messages.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    /// Removes and returns all queued messages.
    #[must_use]
    pub fn drain(&self) -> Vec<DispatchMessage> {
        self.inner.items.lock().unwrap().drain(..).collect()
    }

    /// Opens a consumer sharing this queue's buffer.
    #[must_use]
    pub fn consumer(&self) -> MemoryDispatchConsumer {
        MemoryDispatchConsumer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for MemoryDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchQueue for MemoryDispatchQueue {
    async fn enqueue(&self, msg: &DispatchMessage) -> Result<(), QueueError> {
        if self.inner.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::EnqueueFailed {
                message: "queue unavailable".to_string(),
            });
        }

        self.inner.items.lock().unwrap().push_back(msg.clone());
        self.inner.notify.notify_one();
        Ok(())
    }
}

/// Consumer over a [`MemoryDispatchQueue`].
pub struct MemoryDispatchConsumer {
    inner: Arc<QueueInner>,
}

#[async_trait]
impl DispatchConsumer for MemoryDispatchConsumer {
    async fn next(&mut self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(msg) = self.inner.items.lock().unwrap().pop_front() {
                return Ok(Delivery::new(msg, Box::new(MemoryAcker)));
            }
            self.inner.notify.notified().await;
        }
    }
}

struct MemoryAcker;

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketbeat_schedule::{Schedule, ScheduleEventType};

    #[tokio::test]
    async fn event_bus_delivers_to_subscriber() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe().await.unwrap();

        let event = ScheduleEvent::new(
            ScheduleEventType::Created,
            marketbeat_core::ScheduleId::new(),
        );
        bus.publish(&event).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryEventBus::new();
        let event = ScheduleEvent::new(
            ScheduleEventType::Deleted,
            marketbeat_core::ScheduleId::new(),
        );
        assert!(bus.publish(&event).await.is_ok());
    }

    #[tokio::test]
    async fn queue_enqueue_consume_ack() {
        let queue = MemoryDispatchQueue::new();
        let schedule = Schedule::new("noop", "* * * * *");
        let msg = DispatchMessage::from_schedule(&schedule);

        queue.enqueue(&msg).await.unwrap();
        assert_eq!(queue.depth(), 1);

        let mut consumer = queue.consumer();
        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.message.dispatch_id, msg.dispatch_id);
        delivery.ack().await.unwrap();

        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn queue_failure_injection() {
        let queue = MemoryDispatchQueue::new();
        let schedule = Schedule::new("noop", "* * * * *");
        let msg = DispatchMessage::from_schedule(&schedule);

        queue.set_fail_enqueue(true);
        assert!(queue.enqueue(&msg).await.is_err());
        assert_eq!(queue.depth(), 0);

        queue.set_fail_enqueue(false);
        assert!(queue.enqueue(&msg).await.is_ok());
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn consumer_wakes_on_enqueue() {
        let queue = MemoryDispatchQueue::new();
        let mut consumer = queue.consumer();

        let producer = queue.clone();
        let schedule = Schedule::new("noop", "* * * * *");
        let msg = DispatchMessage::from_schedule(&schedule);
        let expected = msg.dispatch_id;

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            producer.enqueue(&msg).await.unwrap();
        });

        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.message.dispatch_id, expected);
    }
}
