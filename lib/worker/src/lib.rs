//! Task registry and worker pool for marketbeat.
//!
//! This crate provides:
//!
//! - **Task registry**: Process-local map from task name to async function
//! - **Lock service**: Execution-policy enforcement over a shared TTL store
//! - **Worker**: The consume loop turning dispatch messages into executions

pub mod error;
pub mod lock;
pub mod registry;
pub mod worker;

pub use error::{TaskError, WorkerError};
pub use lock::{LockService, TtlLockService};
pub use registry::{TaskInvocation, TaskRegistry};
pub use worker::{Worker, WorkerOptions};
