//! Error types for the LLM cache gateway.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using the gateway's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the LLM cache gateway.
///
/// The type is `Clone` so a single miss episode can hand the same outcome to
/// every caller that coalesced onto it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // =========================================================================
    // Cache Layer Errors
    // =========================================================================
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// The caller-supplied compute function failed. Display is the original
    /// error's message, unchanged.
    #[error("{0}")]
    Compute(Arc<anyhow::Error>),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a compute failure.
    pub fn compute(err: anyhow::Error) -> Self {
        Self::Compute(Arc::new(err))
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from the caller's compute function rather
    /// than from the cache layer.
    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute(_))
    }

    /// The original compute error, if any.
    pub fn compute_source(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Compute(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
