//! Error types for the worker crate.

use std::fmt;

/// Errors a task implementation can surface.
///
/// Whatever the variant, the worker records the message in the execution
/// log and acks the dispatch; retry decisions live inside the task (HTTP
/// backoff) or with the operator, not with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The kwargs/args did not satisfy the task's parameter contract.
    InvalidParameters { reason: String },
    /// An external service rejected or exhausted retries.
    ExternalService { reason: String },
    /// Persisting results failed.
    Storage { message: String },
    /// Anything else the task wants to report.
    ExecutionFailed { reason: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameters { reason } => write!(f, "invalid parameters: {reason}"),
            Self::ExternalService { reason } => write!(f, "external service error: {reason}"),
            Self::Storage { message } => write!(f, "storage error: {message}"),
            Self::ExecutionFailed { reason } => write!(f, "execution failed: {reason}"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Infrastructure errors from the worker loop itself.
///
/// Unlike [`TaskError`], these leave the dispatch unacked so the queue
/// redelivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The execution log store failed.
    LogStore { message: String },
    /// The lock service failed.
    LockService { message: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogStore { message } => write!(f, "execution log store failed: {message}"),
            Self::LockService { message } => write!(f, "lock service failed: {message}"),
        }
    }
}

impl std::error::Error for WorkerError {}
