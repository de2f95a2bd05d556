//! Error types for the bus crate.

use std::fmt;

/// Errors from event bus operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Connection to the broker failed.
    ConnectionFailed { message: String },
    /// Publishing an event failed.
    PublishFailed { message: String },
    /// Creating a subscription failed.
    SubscribeFailed { message: String },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "event bus connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "event publish failed: {message}"),
            Self::SubscribeFailed { message } => write!(f, "event subscribe failed: {message}"),
        }
    }
}

impl std::error::Error for BusError {}

/// Errors from dispatch queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Connection to the broker failed.
    ConnectionFailed { message: String },
    /// Enqueue was not accepted; the fire should be retried.
    EnqueueFailed { message: String },
    /// The consumer could not receive a delivery.
    ConsumeFailed { message: String },
    /// Acknowledging a delivery failed; the message may be redelivered.
    AckFailed { message: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "dispatch queue connection failed: {message}")
            }
            Self::EnqueueFailed { message } => write!(f, "dispatch enqueue failed: {message}"),
            Self::ConsumeFailed { message } => write!(f, "dispatch consume failed: {message}"),
            Self::AckFailed { message } => write!(f, "dispatch ack failed: {message}"),
        }
    }
}

impl std::error::Error for QueueError {}
