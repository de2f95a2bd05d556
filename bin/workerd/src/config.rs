//! Centralized worker daemon configuration.
//!
//! Loaded via the `config` crate from environment variables (nested keys
//! separated with `__`), e.g. `API__BASE_URL`, `RATE_LIMIT__EXTERNAL_API__REQUESTS`.

use marketbeat_bus::NatsConfig;
use marketbeat_integration::{ApiConfig, RateLimitConfig};
use marketbeat_worker::WorkerOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Worker daemon configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL connection URL for execution logs and task tables.
    pub database_url: String,

    /// NATS server URL (dispatch queue broker).
    pub nats_url: String,

    /// Stream name for dispatch messages.
    #[serde(default)]
    pub dispatch_stream: Option<String>,

    /// Subject for dispatch messages.
    #[serde(default)]
    pub dispatch_subject: Option<String>,

    /// Durable consumer name shared by the pool.
    #[serde(default)]
    pub dispatch_consumer: Option<String>,

    /// Parallel worker tasks in this process.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Execution-policy lock TTL in seconds.
    #[serde(default = "default_lock_ttl_s")]
    pub lock_ttl_s: u64,

    /// Bounded wait under the `queue` policy, in seconds.
    #[serde(default = "default_queue_wait_s")]
    pub queue_wait_s: u64,

    /// External market-data API identity and limits.
    pub api: ApiConfig,

    /// Named rate-limit buckets.
    #[serde(default)]
    pub rate_limit: HashMap<String, RateLimitConfig>,
}

fn default_concurrency() -> usize {
    4
}

fn default_lock_ttl_s() -> u64 {
    900
}

fn default_queue_wait_s() -> u64 {
    300
}

impl WorkerConfig {
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

    /// Resolves worker loop tunables.
    #[must_use]
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            lock_ttl: Duration::from_secs(self.lock_ttl_s),
            queue_wait: Duration::from_secs(self.queue_wait_s),
            ..WorkerOptions::default()
        }
    }

    /// Resolves the NATS wiring.
    #[must_use]
    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats_url.clone(),
            mutation_subject: None,
            dispatch_stream_name: self.dispatch_stream.clone(),
            dispatch_subject: self.dispatch_subject.clone(),
            dispatch_consumer_name: self.dispatch_consumer.clone(),
        }
    }

    /// Returns the bucket gating the external API, falling back to the
    /// default per-minute limit when unconfigured.
    #[must_use]
    pub fn external_api_limit(&self) -> RateLimitConfig {
        self.rate_limit
            .get("external_api")
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> WorkerConfig {
        WorkerConfig {
            database_url: "postgres://localhost/marketbeat".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            dispatch_stream: None,
            dispatch_subject: None,
            dispatch_consumer: None,
            concurrency: default_concurrency(),
            lock_ttl_s: default_lock_ttl_s(),
            queue_wait_s: default_queue_wait_s(),
            api: serde_json::from_str(
                r#"{"base_url":"https://api.example.com/v1","mailaddress":"a@b.c","password":"pw"}"#,
            )
            .unwrap(),
            rate_limit: HashMap::new(),
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = minimal();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.worker_options().queue_wait, Duration::from_secs(300));
        assert_eq!(config.external_api_limit().requests, 60);
    }

    #[test]
    fn configured_bucket_wins() {
        let mut config = minimal();
        config
            .rate_limit
            .insert("external_api".to_string(), RateLimitConfig::new(10, 1));
        assert_eq!(config.external_api_limit().requests, 10);
        assert_eq!(config.external_api_limit().window_seconds, 1);
    }
}
