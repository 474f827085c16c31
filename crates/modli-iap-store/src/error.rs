//! Error types for the store gateway.

use thiserror::Error;

/// Errors reported by a [`StoreGateway`](crate::StoreGateway).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store backend could not be reached (or is absent on this build).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An operation was attempted before `connect` or after `disconnect`.
    #[error("store not connected")]
    NotConnected,

    /// The store refused a purchase request synchronously.
    #[error("purchase request rejected ({code}): {message}")]
    Request { code: String, message: String },

    /// Acknowledging / finishing a transaction failed.
    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    /// Listing pending purchases failed.
    #[error("store query failed: {0}")]
    Query(String),

    /// The gateway was shut down.
    #[error("store gateway closed")]
    Closed,
}

impl StoreError {
    /// Store error code, for errors that carry one.
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Request { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the failure is worth retrying against the same store.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Query(_) | StoreError::Unavailable(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
