//! Centralized beat daemon configuration.
//!
//! This module provides strongly-typed configuration for the scheduler
//! daemon, loaded via the `config` crate from environment variables
//! (nested keys separated with `__`).

use marketbeat_bus::NatsConfig;
use marketbeat_schedule::{CronExpr, ScheduleError};
use marketbeat_scheduler::BeatOptions;
use serde::Deserialize;
use std::time::Duration;

/// Beat daemon configuration.
#[derive(Debug, Deserialize)]
pub struct BeatConfig {
    /// PostgreSQL connection URL for the schedule database.
    pub database_url: String,

    /// NATS server URL (event bus and dispatch queue broker).
    pub nats_url: String,

    /// Channel name for schedule mutation events.
    #[serde(default)]
    pub mutation_channel: Option<String>,

    /// Stream name for dispatch messages.
    #[serde(default)]
    pub dispatch_stream: Option<String>,

    /// Subject for dispatch messages.
    #[serde(default)]
    pub dispatch_subject: Option<String>,

    /// Whether the event-driven resync listener runs at all.
    /// When false, only the periodic resync observes schedule edits.
    #[serde(default = "default_mutation_sync_enabled")]
    pub mutation_sync_enabled: bool,

    /// Periodic resync cadence in seconds.
    #[serde(default = "default_resync_interval_s")]
    pub default_resync_interval_s: u64,

    /// Resync coalesce window in seconds.
    #[serde(default = "default_min_sync_interval_s")]
    pub min_sync_interval_s: u64,

    /// Upper bound on the scheduler sleep in seconds.
    #[serde(default = "default_max_tick_interval_s")]
    pub max_tick_interval_s: u64,

    /// IANA zone cron expressions are evaluated in.
    #[serde(default = "default_cron_timezone")]
    pub cron_timezone: String,
}

fn default_mutation_sync_enabled() -> bool {
    true
}

fn default_resync_interval_s() -> u64 {
    60
}

fn default_min_sync_interval_s() -> u64 {
    5
}

fn default_max_tick_interval_s() -> u64 {
    5
}

fn default_cron_timezone() -> String {
    "UTC".to_string()
}

impl BeatConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Resolves the beat loop tunables.
    ///
    /// # Errors
    ///
    /// Returns an error if `cron_timezone` is not an IANA zone.
    pub fn beat_options(&self) -> Result<BeatOptions, ScheduleError> {
        Ok(BeatOptions {
            timezone: CronExpr::parse_timezone(&self.cron_timezone)?,
            default_resync_interval: Duration::from_secs(self.default_resync_interval_s),
            min_sync_interval: Duration::from_secs(self.min_sync_interval_s),
            max_tick_interval: Duration::from_secs(self.max_tick_interval_s),
        })
    }

    /// Resolves the NATS wiring.
    #[must_use]
    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats_url.clone(),
            mutation_subject: self.mutation_channel.clone(),
            dispatch_stream_name: self.dispatch_stream.clone(),
            dispatch_subject: self.dispatch_subject.clone(),
            dispatch_consumer_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> BeatConfig {
        BeatConfig {
            database_url: "postgres://localhost/marketbeat".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            mutation_channel: None,
            dispatch_stream: None,
            dispatch_subject: None,
            mutation_sync_enabled: default_mutation_sync_enabled(),
            default_resync_interval_s: default_resync_interval_s(),
            min_sync_interval_s: default_min_sync_interval_s(),
            max_tick_interval_s: default_max_tick_interval_s(),
            cron_timezone: default_cron_timezone(),
        }
    }

    #[test]
    fn defaults_match_the_documented_cadence() {
        let config = minimal();
        assert!(config.mutation_sync_enabled);
        assert_eq!(config.default_resync_interval_s, 60);
        assert_eq!(config.min_sync_interval_s, 5);
        assert_eq!(config.max_tick_interval_s, 5);
    }

    #[test]
    fn beat_options_resolve_timezone() {
        let mut config = minimal();
        config.cron_timezone = "Asia/Tokyo".to_string();
        assert!(config.beat_options().is_ok());

        config.cron_timezone = "Nowhere/Special".to_string();
        assert!(config.beat_options().is_err());
    }
}
