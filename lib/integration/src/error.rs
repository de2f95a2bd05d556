//! Error types for the integration crate.

use std::fmt;

/// Errors from the pluggable TTL cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backing store operation failed.
    Backend { message: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "cache store failed: {message}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Errors from token acquisition and refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Credentials exchange was rejected.
    ExchangeFailed { reason: String },
    /// Deriving an id token from the refresh token failed.
    RefreshFailed { reason: String },
    /// The token cache's backing store failed.
    StoreFailed { message: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExchangeFailed { reason } => {
                write!(f, "credentials exchange failed: {reason}")
            }
            Self::RefreshFailed { reason } => write!(f, "id token refresh failed: {reason}"),
            Self::StoreFailed { message } => write!(f, "token store failed: {message}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<CacheError> for TokenError {
    fn from(e: CacheError) -> Self {
        Self::StoreFailed {
            message: e.to_string(),
        }
    }
}

/// Errors from external API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Authentication was rejected (401/403).
    Authentication { reason: String },
    /// The API throttled the caller (429).
    RateLimited { retry_after_secs: Option<u64> },
    /// Transient failure (5xx, network).
    Transient { status: Option<u16>, reason: String },
    /// Non-retryable client error.
    Rejected { status: u16, reason: String },
    /// The response body could not be interpreted.
    InvalidResponse { reason: String },
    /// The request timed out.
    Timeout,
    /// Token acquisition failed before the request was made.
    Token { reason: String },
}

impl ApiError {
    /// Returns whether a retry with backoff can help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Transient { .. } | Self::Timeout
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication { reason } => write!(f, "authentication failed: {reason}"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Transient { status, reason } => {
                if let Some(status) = status {
                    write!(f, "transient API failure (status {status}): {reason}")
                } else {
                    write!(f, "transient API failure: {reason}")
                }
            }
            Self::Rejected { status, reason } => {
                write!(f, "request rejected (status {status}): {reason}")
            }
            Self::InvalidResponse { reason } => write!(f, "invalid API response: {reason}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Token { reason } => write!(f, "token acquisition failed: {reason}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        Self::Token {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(
            ApiError::RateLimited {
                retry_after_secs: Some(30)
            }
            .is_transient()
        );
        assert!(
            ApiError::Transient {
                status: Some(503),
                reason: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Authentication {
                reason: "bad token".to_string()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Rejected {
                status: 400,
                reason: "bad date".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn api_error_display() {
        let err = ApiError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert!(err.to_string().contains("60s"));
    }
}
