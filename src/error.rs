//! Error types for the cache-warming pipeline

use crate::models::CacheTier;
use thiserror::Error;

/// Result type alias for warming operations
pub type Result<T> = std::result::Result<T, WarmError>;

/// Error types that can occur while warming the search cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WarmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider kept throttling after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),

    #[error("Write to {tier} tier failed: {message}")]
    TierWrite { tier: CacheTier, message: String },

    #[error("Redelivery exhausted after {attempts} attempts: {last_error}")]
    QueueRedeliveryExhausted { attempts: u32, last_error: String },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for WarmError {
    fn from(err: std::io::Error) -> Self {
        WarmError::IoError(err.to_string())
    }
}

impl WarmError {
    /// Determine if this error should trigger a message-level retry
    ///
    /// Returns true for errors that are potentially transient:
    /// - provider throttling that outlasted the fetcher's own backoff
    /// - network failures and timeouts
    /// - ledger, queue and IO hiccups
    ///
    /// Returns false for errors that will fail the same way on redelivery:
    /// - malformed requests or unsupported subjects
    /// - configuration errors
    /// - an already exhausted redelivery budget
    pub fn should_retry(&self) -> bool {
        match self {
            WarmError::RateLimited { .. } => true,
            WarmError::TransientFetch(_) => true,
            WarmError::LedgerError(_) => true,
            WarmError::QueueError(_) => true,
            WarmError::IoError(_) => true,

            WarmError::PermanentFetch(_) => false,
            WarmError::QueueRedeliveryExhausted { .. } => false,
            WarmError::ConfigError(_) => false,

            // Tier failures never abort a subject, so retrying buys nothing
            WarmError::TierWrite { .. } => false,
            WarmError::CacheError(_) => false,
        }
    }

    /// Create a TierWrite error for the given tier
    pub fn tier_write(tier: CacheTier, message: impl Into<String>) -> Self {
        WarmError::TierWrite {
            tier,
            message: message.into(),
        }
    }

    /// Create an error from a provider HTTP status code
    ///
    /// - 429: throttled (one attempt observed)
    /// - 408 and 5xx: transient, worth retrying later
    /// - other 4xx: permanent, the request itself is bad
    /// - anything else unexpected is treated as permanent
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => WarmError::RateLimited { attempts: 1 },
            408 => WarmError::TransientFetch(format!("HTTP {}: {}", status, message)),
            500..=599 => WarmError::TransientFetch(format!("HTTP {}: {}", status, message)),
            _ => WarmError::PermanentFetch(format!("HTTP {}: {}", status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WarmError::RateLimited { attempts: 3 }.should_retry());
        assert!(WarmError::TransientFetch("timeout".into()).should_retry());
        assert!(!WarmError::PermanentFetch("bad subject".into()).should_retry());
        assert!(!WarmError::QueueRedeliveryExhausted {
            attempts: 3,
            last_error: "boom".into()
        }
        .should_retry());
        assert!(!WarmError::tier_write(CacheTier::Edge, "full").should_retry());
    }

    #[test]
    fn test_from_http_status() {
        assert_eq!(
            WarmError::from_http_status(429, "slow down"),
            WarmError::RateLimited { attempts: 1 }
        );
        assert!(matches!(
            WarmError::from_http_status(503, "unavailable"),
            WarmError::TransientFetch(_)
        ));
        assert!(matches!(
            WarmError::from_http_status(408, "timeout"),
            WarmError::TransientFetch(_)
        ));
        assert!(matches!(
            WarmError::from_http_status(404, "not found"),
            WarmError::PermanentFetch(_)
        ));
        assert!(matches!(
            WarmError::from_http_status(302, "moved"),
            WarmError::PermanentFetch(_)
        ));
    }

    #[test]
    fn test_tier_write_display() {
        let err = WarmError::tier_write(CacheTier::ColdIndex, "disk full");
        assert_eq!(err.to_string(), "Write to cold-index tier failed: disk full");
    }
}
