//! Error types for switchyard-router

use thiserror::Error;

/// Routing error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Missing credential, endpoint or otherwise unusable model configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Selection found no enabled model able to serve the request
    #[error("no available model for request: {0}")]
    NoAvailableModel(String),

    /// Admission denied by the per-model sliding window
    #[error("rate limit exceeded for model {model}")]
    RateLimited {
        /// Model that rejected the request
        model: String,
    },

    /// Provider payload could not be translated
    #[error("translation error: {0}")]
    Translation(String),

    /// Upstream call exceeded its deadline
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Transport-level or HTTP failure reported by the backend
    #[error("upstream error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream {
        /// HTTP status, when the backend answered at all
        status: Option<u16>,
        /// Sanitized message
        message: String,
    },

    /// Corrupt or unreadable cache entry (never surfaced by `route`)
    #[error("cache error: {0}")]
    Cache(String),

    /// Request failed validation before routing
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Registry snapshot could not be read or written
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Build an upstream error without an HTTP status
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Whether this failure should count against the endpoint that served it
    #[must_use]
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Upstream { .. } | Self::Translation(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_with_status() {
        let err = Error::Upstream {
            status: Some(503),
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "upstream error (HTTP 503): overloaded");
        assert_eq!(
            Error::upstream("connection reset").to_string(),
            "upstream error: connection reset"
        );
    }

    #[test]
    fn test_endpoint_failure_classification() {
        assert!(Error::Timeout(30_000).is_endpoint_failure());
        assert!(Error::Translation("missing choices".into()).is_endpoint_failure());
        assert!(!Error::RateLimited { model: "m".into() }.is_endpoint_failure());
        assert!(!Error::NoAvailableModel("gpt-4".into()).is_endpoint_failure());
    }
}
