//! Error types for entitlement application.

use thiserror::Error;

/// Errors that can occur while granting credits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// No authenticated session could be obtained.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The backend rejected the session token.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend refused the grant.
    #[error("grant rejected: {0}")]
    Rejected(String),

    /// The backend could not be reached or failed internally.
    #[error("backend error: {0}")]
    Backend(String),
}

impl EntitlementError {
    /// Whether a retry of the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EntitlementError::SessionUnavailable(_) | EntitlementError::Backend(_)
        )
    }
}

/// Result type for entitlement operations.
pub type Result<T> = std::result::Result<T, EntitlementError>;
