//! Schedule and execution-log persistence for marketbeat.
//!
//! This crate provides:
//!
//! - **Schedule store**: CRUD over persisted schedule records with filtering
//! - **Execution log store**: Append-only per-task execution records
//! - **Postgres implementations**: sqlx-backed repositories
//! - **Memory implementations**: In-process doubles for tests
//! - **Schedule service**: The mutation façade that publishes bus events

pub mod error;
pub mod execution_store;
pub mod memory;
pub mod schedule_store;
pub mod service;

pub use error::StoreError;
pub use execution_store::{ExecutionLogFilter, ExecutionLogStore, PgExecutionLogStore};
pub use memory::{MemoryExecutionLogStore, MemoryScheduleStore};
pub use schedule_store::{PgScheduleStore, ScheduleFilter, ScheduleStore};
pub use service::ScheduleService;
