//! Database-backed beat scheduler for marketbeat.
//!
//! This crate provides:
//!
//! - **Beat**: The singleton scheduler owning a refreshed snapshot of
//!   enabled schedules, computing due entries, and emitting dispatches
//! - **Resync handle**: The "resync wanted" flag shared with the listener
//! - **Listener**: The event-bus subscriber that converts mutation events
//!   into resync requests, reconnecting with capped backoff
//!
//! The deployment runs exactly one beat process; a second instance would
//! double-fire every schedule. Leader election is out of scope.

pub mod beat;
pub mod entry;
pub mod error;
pub mod listener;

pub use beat::{Beat, BeatOptions, ResyncHandle};
pub use entry::ScheduleEntry;
pub use error::BeatError;
pub use listener::run_listener;
