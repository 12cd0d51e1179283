//! Structured error types for the intelligence core.
//!
//! Every recoverable failure mode has its own variant so callers can branch
//! on it; batch processing never propagates a per-commodity error upward.

use std::fmt;

// =============================================================================
// ANALYTICS ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    /// Fewer observations than the computation needs. Callers treat this as
    /// an "insufficient" signal, never as a zero.
    InsufficientData {
        required: usize,
        available: usize,
    },
}

impl fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsError::InsufficientData {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient data: need at least {} observations, have {}",
                    required, available
                )
            }
        }
    }
}

impl std::error::Error for AnalyticsError {}

// =============================================================================
// CACHE ERRORS
// =============================================================================

#[derive(Debug)]
pub enum CacheError {
    /// Persistent tier unreachable. Degraded to miss-everything behavior;
    /// the memory tier keeps serving.
    Unavailable {
        reason: String,
    },
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    InvalidName {
        name: String,
        reason: String,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable { reason } => {
                write!(f, "Persistent cache unavailable: {}", reason)
            }
            CacheError::Database(e) => write!(f, "Database error: {}", e),
            CacheError::Serialization(e) => write!(f, "Payload serialization failed: {}", e),
            CacheError::InvalidName { name, reason } => {
                write!(f, "Invalid commodity name '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for CacheError {}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err)
    }
}

// =============================================================================
// PROVIDER ERRORS
// =============================================================================

#[derive(Debug)]
pub enum ProviderError {
    MissingApiKey,
    Http(reqwest::Error),
    /// Non-success HTTP status from the provider API.
    Api {
        status: u16,
        body: String,
    },
    RateLimited {
        limiter: String,
        waited_secs: f64,
    },
    Timeout {
        seconds: u64,
    },
    /// Response received but not interpretable as a market summary, even
    /// after degraded text extraction. Fails closed.
    MalformedResponse {
        detail: String,
    },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::MissingApiKey => {
                write!(f, "Provider API key is required (set PERPLEXITY_API_KEY)")
            }
            ProviderError::Http(e) => write!(f, "HTTP request failed: {}", e),
            ProviderError::Api { status, body } => {
                write!(f, "Provider API returned HTTP {}: {}", status, body)
            }
            ProviderError::RateLimited {
                limiter,
                waited_secs,
            } => {
                write!(
                    f,
                    "Rate limit timeout on '{}' after {:.1}s",
                    limiter, waited_secs
                )
            }
            ProviderError::Timeout { seconds } => {
                write!(f, "Provider query timed out after {}s", seconds)
            }
            ProviderError::MalformedResponse { detail } => {
                write!(f, "Malformed provider response: {}", detail)
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err)
    }
}

impl ProviderError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Timeout { seconds: 30 }.is_retryable());
        assert!(ProviderError::Api {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Api {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::MissingApiKey.is_retryable());
        assert!(!ProviderError::MalformedResponse {
            detail: "not json".into()
        }
        .is_retryable());
    }
}
