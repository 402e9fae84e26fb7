//! Error types for the Conclave client

use thiserror::Error;

use crate::transport::NodeFailure;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed credential or parameters. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Session rejected by the network: expired, tampered, or missing
    /// capability. Fatal to the session; the caller may mint a new one.
    #[error("authorization error: {0}")]
    Auth(String),

    /// Node unreachable or timed out. Retried within the dispatcher's
    /// bounded budget, otherwise counted as a node failure.
    #[error("network error: {0}")]
    Network(String),

    /// Too few valid shares after retries and timeouts. Carries the
    /// per-node failures for diagnostics.
    #[error("quorum not reached: {obtained} of {needed} required shares")]
    Quorum {
        needed: usize,
        obtained: usize,
        failures: Vec<NodeFailure>,
    },

    /// Shares inconsistent, or the assembled result failed verification.
    /// Security relevant; never coerced into a best-effort result.
    #[error("combine error: {0}")]
    Combine(String),

    /// Uniqueness violation on key import.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad injected configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Validation(format!("base64 decode error: {e}"))
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
