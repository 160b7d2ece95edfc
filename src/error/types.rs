//! Core error types for the gateway.

use std::time::Duration;

use thiserror::Error;

/// Coarse error category used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Authentication,
    Routing,
    RateLimit,
    Network,
    Storage,
    Cache,
    Client,
    Configuration,
    Cancelled,
}

/// Errors surfaced by the router, token cache and conversation service.
///
/// Provider and transport failures are translated into this taxonomy at the
/// router boundary, so callers never see a raw `reqwest` or `sqlx` error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Token acquisition or validation failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No registered provider matches the requested model.
    #[error("No provider supports model '{0}'")]
    ModelNotFound(String),

    /// The provider signaled throttling.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network, timeout or malformed-stream failure.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The durable conversation tier is unreachable.
    #[error("Durable store unavailable: {0}")]
    StoreUnavailable(String),

    /// The conversation cache tier is unreachable. Never fatal.
    #[error("Conversation cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The request itself is malformed or was rejected by the provider.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The session was soft-deleted and accepts no further messages.
    #[error("Session '{0}' is inactive")]
    SessionInactive(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Build a `RateLimited` error with an optional `Retry-After` hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Category of this error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthFailed(_) => ErrorCategory::Authentication,
            Self::ModelNotFound(_) => ErrorCategory::Routing,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::TransportError(_) => ErrorCategory::Network,
            Self::StoreUnavailable(_) => ErrorCategory::Storage,
            Self::CacheUnavailable(_) => ErrorCategory::Cache,
            Self::InvalidInput(_) | Self::SessionInactive(_) => ErrorCategory::Client,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether a retry of the same operation may succeed.
    ///
    /// `AuthFailed` is not included: it is fatal for the current
    /// call and only retried by the next call.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::TransportError(_))
    }

    /// Whether the error must abort the caller's operation.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::CacheUnavailable(_))
    }

    /// Server-provided retry hint, if any.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
