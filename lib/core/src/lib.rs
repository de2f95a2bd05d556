//! Core domain types and utilities for the marketbeat platform.
//!
//! This crate provides the foundational id types, error handling, and shared
//! utilities used throughout the marketbeat market-data ingestion platform.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{DispatchId, ExecutionId, ParseIdError, ScheduleId};
