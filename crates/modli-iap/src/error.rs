//! Error types for the purchases facade.

use modli_iap_core::CoreError;
use modli_iap_entitlement::EntitlementError;
use modli_iap_purchase::CoordinatorError;
use modli_iap_store::StoreError;
use thiserror::Error;

/// Errors that can occur during purchases operations.
#[derive(Debug, Error)]
pub enum PurchasesError {
    /// Plan configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Entitlement error.
    #[error("entitlement error: {0}")]
    Entitlement(#[from] EntitlementError),

    /// Coordinator error.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

impl PurchasesError {
    /// Whether the facade has been disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(self, PurchasesError::Coordinator(CoordinatorError::Disposed))
    }
}

/// Result type for purchases operations.
pub type Result<T> = std::result::Result<T, PurchasesError>;
