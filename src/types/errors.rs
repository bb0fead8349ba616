//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::limiter::LimiterDecision;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the admission and tool-client core.
#[derive(Error, Debug)]
pub enum Error {
    /// Admission denied (map to HTTP 429). Carries the binding decision so the
    /// caller can render quota headers.
    #[error("rate limit exceeded: limit {} per {}s", decision.limit, decision.window_seconds)]
    RateLimitExceeded { decision: LimiterDecision },

    /// Tool server could not be reached (connect/reset/DNS).
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    /// Per-attempt deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Inbound signed envelope failed verification (map to HTTP 401).
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Tool server answered with something that is not the protocol shape.
    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    /// Retry budget exhausted.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// Tool server reported an application-level error object.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Credential could not be encrypted or decrypted.
    #[error("credential error: {0}")]
    Credential(String),

    /// Shared limiter store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Validation errors (bad configuration or arguments).
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::EndpointUnreachable(_))
    }

    /// HTTP status the surrounding service should answer with.
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::RateLimitExceeded { .. } => 429,
            Error::SignatureInvalid(_) => 401,
            Error::Validation(_) => 400,
            Error::Timeout(_) => 504,
            Error::EndpointUnreachable(_)
            | Error::MalformedUpstreamResponse(_)
            | Error::MaxRetriesExceeded { .. }
            | Error::ToolError(_) => 502,
            Error::Credential(_)
            | Error::Store(_)
            | Error::Internal(_)
            | Error::Serialization(_) => 500,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn rate_limited(decision: LimiterDecision) -> Self {
        Self::RateLimitExceeded { decision }
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::EndpointUnreachable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn signature_invalid(msg: impl Into<String>) -> Self {
        Self::SignatureInvalid(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedUpstreamResponse(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
