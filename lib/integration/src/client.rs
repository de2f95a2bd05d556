//! Authenticated HTTP client for the external market-data API.
//!
//! The API authenticates with a two-step token scheme (credentials exchange,
//! then bearer derivation) and throttles aggressively, so every call goes
//! through the token cache and bounded retry with exponential backoff.

use crate::error::{ApiError, TokenError};
use crate::token_cache::{IdToken, TokenCache, TokenProvider};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::time::Duration;

/// Lifetime the API grants a derived id token.
const ID_TOKEN_LIFETIME_HOURS: i64 = 24;

/// Base delay for retry backoff.
const BACKOFF_BASE_MS: u64 = 500;

/// Ceiling for retry backoff.
const BACKOFF_CAP_MS: u64 = 10_000;

/// Configuration for the external API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. "https://api.example.com/v1".
    pub base_url: String,
    /// Account identity for the credentials exchange.
    pub mailaddress: String,
    /// Account secret for the credentials exchange.
    pub password: String,
    /// Total per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Bounded retry attempts for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

/// HTTP-backed token provider hitting the API's auth endpoints.
pub struct HttpTokenProvider {
    http: reqwest::Client,
    config: ApiConfig,
}

impl HttpTokenProvider {
    /// Creates a provider with its own timeout-bounded client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TokenError::ExchangeFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }
}

#[derive(Deserialize)]
struct RefreshTokenResponse {
    refresh_token: String,
}

#[derive(Deserialize)]
struct IdTokenResponse {
    id_token: String,
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn exchange_credentials(&self) -> Result<String, TokenError> {
        let url = format!("{}/token/auth_user", self.config.base_url);
        let body = serde_json::json!({
            "mailaddress": self.config.mailaddress,
            "password": self.config.password,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TokenError::ExchangeFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TokenError::ExchangeFailed {
                reason: format!("status {}", response.status()),
            });
        }

        let parsed: RefreshTokenResponse =
            response
                .json()
                .await
                .map_err(|e| TokenError::ExchangeFailed {
                    reason: format!("undecodable response: {e}"),
                })?;

        Ok(parsed.refresh_token)
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<IdToken, TokenError> {
        let url = format!("{}/token/auth_refresh", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .query(&[("refreshtoken", refresh_token)])
            .send()
            .await
            .map_err(|e| TokenError::RefreshFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TokenError::RefreshFailed {
                reason: format!("status {}", response.status()),
            });
        }

        let parsed: IdTokenResponse =
            response
                .json()
                .await
                .map_err(|e| TokenError::RefreshFailed {
                    reason: format!("undecodable response: {e}"),
                })?;

        Ok(IdToken {
            token: parsed.id_token,
            expires_at: Utc::now() + ChronoDuration::hours(ID_TOKEN_LIFETIME_HOURS),
        })
    }
}

/// Authenticated client for market-data endpoints.
pub struct MarketApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    tokens: Arc<TokenCache>,
    token_key: String,
}

impl MarketApiClient {
    /// Creates a client over the shared token cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig, tokens: Arc<TokenCache>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Transient {
                status: None,
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let token_key = config.mailaddress.clone();
        Ok(Self {
            http,
            config,
            tokens,
            token_key,
        })
    }

    /// GETs a JSON document with retry on transient failures.
    ///
    /// Authentication rejections trigger exactly one forced token refresh;
    /// transient failures (5xx, 429, network, timeout) retry with bounded
    /// exponential backoff. Other client errors surface immediately.
    ///
    /// # Errors
    ///
    /// Returns the final classified error once attempts are exhausted.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, ApiError> {
        let mut auth_retried = false;
        let mut attempt: u32 = 0;

        loop {
            match self.get_once(path, query).await {
                Ok(value) => return Ok(value),
                Err(ApiError::Authentication { reason }) if !auth_retried => {
                    tracing::debug!(path, %reason, "Authentication rejected; forcing token refresh");
                    auth_retried = true;
                    self.tokens.force_refresh(&self.token_key).await?;
                }
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_attempts => {
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient API failure; backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<JsonValue, ApiError> {
        let token = self.tokens.get_id_token(&self.token_key).await?;
        let url = format!("{}{path}", self.config.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| ApiError::InvalidResponse {
                reason: e.to_string(),
            });
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();

        Err(classify_status(status, retry_after, body))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transient {
            status: None,
            reason: e.to_string(),
        }
    }
}

fn classify_status(
    status: reqwest::StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::Authentication {
            reason: format!("status {status}: {body}"),
        },
        429 => ApiError::RateLimited { retry_after_secs },
        status_code if status.is_server_error() => ApiError::Transient {
            status: Some(status_code),
            reason: body,
        },
        status_code => ApiError::Rejected {
            status: status_code,
            reason: body,
        },
    }
}

/// Exponential backoff with a fixed base and cap.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(16));
    Duration::from_millis(exp.min(BACKOFF_CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;

        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, String::new()),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(12), String::new()),
            ApiError::RateLimited {
                retry_after_secs: Some(12)
            }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, String::new()),
            ApiError::Transient {
                status: Some(502),
                ..
            }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, String::new()),
            ApiError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn api_config_defaults() {
        let config: ApiConfig = serde_json::from_str(
            r#"{"base_url":"https://api.example.com/v1","mailaddress":"a@b.c","password":"pw"}"#,
        )
        .unwrap();

        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.max_attempts, 4);
    }
}
