//! Error types for the purchase coordinator.
//!
//! Purchase results are [`PurchaseOutcome`](modli_iap_core::PurchaseOutcome)
//! values, not errors. These errors cover misuse of the coordinator itself
//! and store failures outside a purchase attempt.

use thiserror::Error;

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] modli_iap_store::StoreError),

    /// The coordinator was disposed.
    #[error("coordinator disposed")]
    Disposed,

    /// The operation needs a connected store.
    #[error("coordinator not ready")]
    NotReady,
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
