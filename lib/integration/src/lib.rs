//! External API access for the marketbeat platform.
//!
//! This crate provides:
//!
//! - **Token cache**: Credential storage with refresh-on-expiry and a
//!   pluggable TTL-backed store
//! - **Rate limiter**: Token-bucket gating of external API calls per named
//!   bucket
//! - **API client**: Authenticated HTTP access with bounded retry/backoff

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod token_cache;

pub use client::{ApiConfig, HttpTokenProvider, MarketApiClient};
pub use error::{ApiError, CacheError, TokenError};
pub use rate_limit::{RateLimitConfig, RateLimiter, RateLimiterRegistry};
pub use token_cache::{IdToken, MemoryTtlStore, TokenCache, TokenProvider, TokenRecord, TtlStore};
