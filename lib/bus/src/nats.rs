//! NATS-backed bus implementations.
//!
//! - Mutation events ride core NATS pub/sub on a single subject: delivery is
//!   best-effort by design, the periodic resync is the correctness backstop.
//! - Dispatch messages ride a JetStream work-queue stream: enqueue is
//!   acknowledged by the broker and survives restarts, consumers ack each
//!   delivery explicitly (at-least-once).

use crate::error::{BusError, QueueError};
use crate::event_bus::{EventBus, EventSubscription};
use crate::queue::{Acknowledge, Delivery, DispatchConsumer, DispatchQueue};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use marketbeat_schedule::{DispatchMessage, ScheduleEvent};

/// Default subject for schedule-mutation events.
const MUTATION_SUBJECT: &str = "marketbeat.schedule.events";

/// Default stream name for dispatch messages.
const DISPATCH_STREAM_NAME: &str = "MARKETBEAT_DISPATCH";

/// Default subject for dispatch messages.
const DISPATCH_SUBJECT: &str = "marketbeat.dispatch.tasks";

/// Default durable consumer name shared by the worker pool.
const DISPATCH_CONSUMER_NAME: &str = "marketbeat-workers";

/// Configuration for NATS-backed bus and queue.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Subject for mutation events (defaults to marketbeat.schedule.events).
    pub mutation_subject: Option<String>,
    /// Stream name for dispatch messages (defaults to MARKETBEAT_DISPATCH).
    pub dispatch_stream_name: Option<String>,
    /// Subject for dispatch messages (defaults to marketbeat.dispatch.tasks).
    pub dispatch_subject: Option<String>,
    /// Durable consumer name (defaults to marketbeat-workers).
    pub dispatch_consumer_name: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mutation_subject: None,
            dispatch_stream_name: None,
            dispatch_subject: None,
            dispatch_consumer_name: None,
        }
    }

    fn mutation_subject(&self) -> &str {
        self.mutation_subject.as_deref().unwrap_or(MUTATION_SUBJECT)
    }

    fn dispatch_stream(&self) -> &str {
        self.dispatch_stream_name
            .as_deref()
            .unwrap_or(DISPATCH_STREAM_NAME)
    }

    fn dispatch_subject(&self) -> &str {
        self.dispatch_subject.as_deref().unwrap_or(DISPATCH_SUBJECT)
    }

    fn dispatch_consumer(&self) -> &str {
        self.dispatch_consumer_name
            .as_deref()
            .unwrap_or(DISPATCH_CONSUMER_NAME)
    }
}

/// Core NATS pub/sub event bus for the mutation channel.
pub struct NatsEventBus {
    client: async_nats::Client,
    subject: String,
}

impl NatsEventBus {
    /// Connects to NATS and binds the mutation subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        let client =
            async_nats::connect(&config.url)
                .await
                .map_err(|e| BusError::ConnectionFailed {
                    message: e.to_string(),
                })?;

        Ok(Self {
            client,
            subject: config.mutation_subject().to_string(),
        })
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: &ScheduleEvent) -> Result<(), BusError> {
        let bytes = event.to_json_bytes().map_err(|e| BusError::PublishFailed {
            message: format!("failed to serialize event: {e}"),
        })?;

        self.client
            .publish(self.subject.clone(), bytes.into())
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, BusError> {
        let subscriber = self.client.subscribe(self.subject.clone()).await.map_err(
            |e| BusError::SubscribeFailed {
                message: e.to_string(),
            },
        )?;

        Ok(Box::new(NatsEventSubscription { subscriber }))
    }
}

struct NatsEventSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl EventSubscription for NatsEventSubscription {
    async fn recv(&mut self) -> Option<ScheduleEvent> {
        while let Some(message) = self.subscriber.next().await {
            match ScheduleEvent::from_json_bytes(&message.payload) {
                Ok(event) => return Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable mutation event");
                }
            }
        }
        None
    }
}

/// JetStream work-queue dispatch queue.
pub struct NatsDispatchQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsDispatchQueue {
    /// Connects to NATS and ensures the dispatch stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            QueueError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;

        let jetstream = async_nats::jetstream::new(client);
        Self::ensure_stream(&jetstream, &config).await?;

        Ok(Self { jetstream, config })
    }

    /// Ensures the work-queue stream exists.
    async fn ensure_stream(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
    ) -> Result<(), QueueError> {
        let stream_config = jetstream::stream::Config {
            name: config.dispatch_stream().to_string(),
            subjects: vec![config.dispatch_subject().to_string()],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to create dispatch stream: {e}"),
            })?;

        Ok(())
    }

    /// Opens the shared durable consumer for the worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer or its message stream cannot be set up.
    pub async fn consumer(&self) -> Result<NatsDispatchConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(self.config.dispatch_stream())
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                message: format!("failed to get stream: {e}"),
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(self.config.dispatch_consumer().to_string()),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(self.config.dispatch_consumer(), consumer_config)
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                message: format!("failed to create consumer: {e}"),
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                message: format!("failed to get messages: {e}"),
            })?;

        Ok(NatsDispatchConsumer { messages })
    }
}

#[async_trait]
impl DispatchQueue for NatsDispatchQueue {
    async fn enqueue(&self, msg: &DispatchMessage) -> Result<(), QueueError> {
        let bytes = msg.to_json_bytes().map_err(|e| QueueError::EnqueueFailed {
            message: format!("failed to serialize dispatch: {e}"),
        })?;

        self.jetstream
            .publish(self.config.dispatch_subject().to_string(), bytes.into())
            .await
            .map_err(|e| QueueError::EnqueueFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::EnqueueFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// Pull-based consumer over the dispatch stream.
pub struct NatsDispatchConsumer {
    messages: jetstream::consumer::pull::Stream,
}

#[async_trait]
impl DispatchConsumer for NatsDispatchConsumer {
    async fn next(&mut self) -> Result<Delivery, QueueError> {
        loop {
            let message = match self.messages.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(QueueError::ConsumeFailed {
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(QueueError::ConsumeFailed {
                        message: "consumer stream closed".to_string(),
                    });
                }
            };

            match DispatchMessage::from_json_bytes(&message.payload) {
                Ok(decoded) => {
                    return Ok(Delivery::new(decoded, Box::new(NatsAcker { message })));
                }
                Err(e) => {
                    // Undecodable payloads are acked away so they cannot
                    // poison the work queue.
                    tracing::warn!(error = %e, "Acking undecodable dispatch message");
                    if let Err(e) = message.ack().await {
                        tracing::warn!(error = %e, "Failed to ack undecodable dispatch");
                    }
                }
            }
        }
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.message.ack().await.map_err(|e| QueueError::AckFailed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nats_config_defaults() {
        let config = NatsConfig::new("nats://localhost:4222");

        assert_eq!(config.mutation_subject(), MUTATION_SUBJECT);
        assert_eq!(config.dispatch_stream(), DISPATCH_STREAM_NAME);
        assert_eq!(config.dispatch_subject(), DISPATCH_SUBJECT);
        assert_eq!(config.dispatch_consumer(), DISPATCH_CONSUMER_NAME);
    }

    #[test]
    fn nats_config_custom() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            mutation_subject: Some("custom.events".to_string()),
            dispatch_stream_name: Some("CUSTOM_DISPATCH".to_string()),
            dispatch_subject: Some("custom.tasks".to_string()),
            dispatch_consumer_name: Some("custom-workers".to_string()),
        };

        assert_eq!(config.mutation_subject(), "custom.events");
        assert_eq!(config.dispatch_stream(), "CUSTOM_DISPATCH");
        assert_eq!(config.dispatch_subject(), "custom.tasks");
        assert_eq!(config.dispatch_consumer(), "custom-workers");
    }
}
