//! The dispatch queue port between scheduler and workers.

use crate::error::QueueError;
use async_trait::async_trait;
use marketbeat_schedule::DispatchMessage;

/// Producer side: a durable FIFO queue of dispatch messages.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueues a message.
    ///
    /// Success means the message is accepted and will survive a restart.
    /// On failure the scheduler leaves `last_fire_at` unadvanced and retries
    /// the fire on its next tick.
    async fn enqueue(&self, msg: &DispatchMessage) -> Result<(), QueueError>;
}

/// Consumer side: at-least-once delivery with explicit acknowledgement.
///
/// A delivery that is not acked (worker crash, handler failure) is
/// redelivered to some consumer.
#[async_trait]
pub trait DispatchConsumer: Send {
    /// Blocks until the next delivery is available.
    async fn next(&mut self) -> Result<Delivery, QueueError>;
}

/// One delivered message plus its acknowledgement handle.
pub struct Delivery {
    /// The decoded dispatch message.
    pub message: DispatchMessage,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Creates a delivery from a message and its acker.
    #[must_use]
    pub fn new(message: DispatchMessage, acker: Box<dyn Acknowledge>) -> Self {
        Self { message, acker }
    }

    /// Acknowledges the delivery, removing it from the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects the ack; the message may then
    /// be redelivered.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Backend-specific acknowledgement of a single delivery.
#[async_trait]
pub trait Acknowledge: Send {
    /// Acknowledges the delivery.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}
