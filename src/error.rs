//! Error types for phileas_core.

use thiserror::Error;

/// Error types for discovery operations.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("store error: {0}")]
    Store(String),
}

impl DiscoveryError {
    /// Whether the tile that produced this error should be retried on a
    /// later tick (transient failures only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::Network(_) | DiscoveryError::Cancelled(_))
    }
}

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
