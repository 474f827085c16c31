//! Store events and error classification.
//!
//! After a purchase request is accepted, the store reports the result
//! asynchronously as either a purchase update (a [`Transaction`]) or a
//! purchase error carrying a store error code.

use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Store error codes as reported by the platform billing bridge.
pub mod codes {
    pub const USER_CANCELLED: &str = "E_USER_CANCELLED";
    pub const USER_CANCELLED_LEGACY: &str = "USER_CANCELLED";

    pub const NETWORK_ERROR: &str = "E_NETWORK_ERROR";
    pub const SERVICE_ERROR: &str = "E_SERVICE_ERROR";
    pub const REMOTE_ERROR: &str = "E_REMOTE_ERROR";
    pub const NOT_PREPARED: &str = "E_NOT_PREPARED";
    pub const DEFERRED_PAYMENT: &str = "E_DEFERRED_PAYMENT";
    pub const INTERRUPTED: &str = "E_INTERRUPTED";

    pub const ITEM_UNAVAILABLE: &str = "E_ITEM_UNAVAILABLE";
    pub const DEVELOPER_ERROR: &str = "E_DEVELOPER_ERROR";
    pub const ALREADY_OWNED: &str = "E_ALREADY_OWNED";
    pub const RECEIPT_FAILED: &str = "E_RECEIPT_FAILED";
    pub const USER_ERROR: &str = "E_USER_ERROR";
    pub const UNKNOWN: &str = "E_UNKNOWN";
}

/// How a store error should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The user backed out. Silent, no alert.
    Cancelled,
    /// Connectivity or store-side hiccup. Retrying later may succeed.
    Transient,
    /// Misconfiguration or a permanent refusal.
    Fatal,
}

impl ErrorClass {
    /// Classify a store error code. Unrecognized codes are fatal.
    pub fn classify(code: &str) -> Self {
        match code {
            codes::USER_CANCELLED | codes::USER_CANCELLED_LEGACY => ErrorClass::Cancelled,
            codes::NETWORK_ERROR
            | codes::SERVICE_ERROR
            | codes::REMOTE_ERROR
            | codes::NOT_PREPARED
            | codes::DEFERRED_PAYMENT
            | codes::INTERRUPTED => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}

/// A purchase-error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreErrorEvent {
    /// Store error code, e.g. `E_USER_CANCELLED`.
    pub code: String,
    /// Human-readable message from the store.
    pub message: String,
}

impl StoreErrorEvent {
    /// Create an error event.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classification of this error's code.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::classify(&self.code)
    }
}

/// Event delivered by the store after a purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// A transaction completed (or was redelivered).
    PurchaseUpdated(Transaction),
    /// The purchase flow failed or was cancelled.
    PurchaseFailed(StoreErrorEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_codes() {
        assert_eq!(ErrorClass::classify("E_USER_CANCELLED"), ErrorClass::Cancelled);
        assert_eq!(ErrorClass::classify("USER_CANCELLED"), ErrorClass::Cancelled);
    }

    #[test]
    fn test_transient_codes() {
        for code in [codes::NETWORK_ERROR, codes::SERVICE_ERROR, codes::NOT_PREPARED] {
            assert_eq!(ErrorClass::classify(code), ErrorClass::Transient, "{code}");
        }
    }

    #[test]
    fn test_unknown_codes_are_fatal() {
        assert_eq!(ErrorClass::classify(codes::ITEM_UNAVAILABLE), ErrorClass::Fatal);
        assert_eq!(ErrorClass::classify("E_SOMETHING_NEW"), ErrorClass::Fatal);
        assert_eq!(ErrorClass::classify(""), ErrorClass::Fatal);
    }

    #[test]
    fn test_event_class() {
        let event = StoreErrorEvent::new(codes::USER_CANCELLED, "user backed out");
        assert_eq!(event.class(), ErrorClass::Cancelled);
    }
}
