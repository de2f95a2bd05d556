//! Schedule domain model and cron evaluation for marketbeat.
//!
//! This crate provides:
//!
//! - **Schedule**: The persisted unit the scheduler fires on
//! - **Cron evaluator**: Five-field cron parsing and next-fire computation
//! - **Dispatch message**: The wire payload from scheduler to worker
//! - **Mutation events**: The schedule-change notifications on the event bus
//! - **Execution log**: Per-invocation execution records

pub mod cron;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod execution;
pub mod model;

pub use cron::CronExpr;
pub use dispatch::DispatchMessage;
pub use error::ScheduleError;
pub use event::{ScheduleEvent, ScheduleEventType};
pub use execution::{ExecutionLog, ExecutionStatus};
pub use model::{ExecutionPolicy, Schedule, param_digest};
