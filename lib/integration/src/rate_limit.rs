//! Rate limiting for external API calls.
//!
//! Token bucket per named bucket: `capacity` tokens, restored to full every
//! `window_seconds`. Callers either block on [`RateLimiter::acquire`] or
//! probe with [`RateLimiter::try_acquire`].

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Rate limit configuration for one bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens available per window.
    pub requests: u32,
    /// Window duration in seconds.
    pub window_seconds: u64,
}

impl RateLimitConfig {
    /// Creates a new rate limit configuration.
    #[must_use]
    pub fn new(requests: u32, window_seconds: u64) -> Self {
        Self {
            requests,
            window_seconds,
        }
    }

    /// Common limit: requests per minute.
    #[must_use]
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, 60)
    }

    /// Common limit: requests per hour.
    #[must_use]
    pub fn per_hour(requests: u32) -> Self {
        Self::new(requests, 3600)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// State for a single bucket window.
#[derive(Debug)]
struct BucketState {
    /// Tokens remaining in this window.
    tokens: u32,
    /// When this window started.
    window_start: Instant,
}

/// A token-bucket rate limiter.
///
/// Clones share state, so one limiter can gate many concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<BucketState>>,
}

impl RateLimiter {
    /// Creates a full bucket with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let state = BucketState {
            tokens: config.requests,
            window_start: Instant::now(),
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Takes a token, waiting for the window to roll when the bucket is dry.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                Self::refill(&self.config, &mut state, now);

                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }

                // Sleep outside the lock so other callers can race for the
                // refilled window.
                (state.window_start + self.config.window()).saturating_duration_since(now)
            };

            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    /// Takes a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        Self::refill(&self.config, &mut state, Instant::now());

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn refill(config: &RateLimitConfig, state: &mut BucketState, now: Instant) {
        if now.duration_since(state.window_start) >= config.window() {
            state.tokens = config.requests;
            state.window_start = now;
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Named rate-limit buckets resolved from configuration.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: HashMap<String, RateLimiter>,
}

impl RateLimiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from named configurations.
    #[must_use]
    pub fn from_configs(configs: HashMap<String, RateLimitConfig>) -> Self {
        let buckets = configs
            .into_iter()
            .map(|(name, config)| (name, RateLimiter::new(config)))
            .collect();
        Self { buckets }
    }

    /// Adds or replaces a bucket.
    pub fn insert(&mut self, name: impl Into<String>, config: RateLimitConfig) {
        self.buckets.insert(name.into(), RateLimiter::new(config));
    }

    /// Looks up a bucket by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RateLimiter> {
        self.buckets.get(name)
    }
}
