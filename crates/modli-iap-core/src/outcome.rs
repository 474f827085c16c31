//! Terminal results of a purchase attempt.

use serde::{Deserialize, Serialize};

use crate::types::{PlanId, ProductId, TransactionId};

/// Why a purchase attempt failed.
///
/// The variants split at acknowledgment: everything except
/// [`FailureReason::CreditGrantFailed`] happens before the store consumed the
/// transaction and is safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The store could not be reached at connect time.
    ConnectionUnavailable,
    /// The plan's product is not in the current catalog.
    ProductsNotLoaded,
    /// The requested plan id is not configured.
    UnknownPlan(PlanId),
    /// The store refused the purchase request synchronously.
    RequestError(String),
    /// The store reported a product no plan claims. Left unacknowledged.
    UnknownProduct(ProductId),
    /// Acknowledging the transaction failed. Left unacknowledged.
    VerificationFailed(String),
    /// Acknowledged, but the entitlement grant failed. Needs reconciliation.
    CreditGrantFailed {
        transaction_id: TransactionId,
        message: String,
    },
    /// A transient store error event.
    Transient { code: String, message: String },
    /// A fatal store error event.
    Fatal { code: String, message: String },
    /// The coordinator was disposed while the attempt was in flight.
    Interrupted,
}

impl FailureReason {
    /// Whether retrying the purchase is safe.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureReason::CreditGrantFailed { .. } | FailureReason::UnknownPlan(_)
        )
    }

    /// Whether an operator must reconcile this failure out of band.
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, FailureReason::CreditGrantFailed { .. })
    }

    /// Short machine-readable kind, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::ConnectionUnavailable => "connection_unavailable",
            FailureReason::ProductsNotLoaded => "products_not_loaded",
            FailureReason::UnknownPlan(_) => "unknown_plan",
            FailureReason::RequestError(_) => "request_error",
            FailureReason::UnknownProduct(_) => "unknown_product",
            FailureReason::VerificationFailed(_) => "verification_failed",
            FailureReason::CreditGrantFailed { .. } => "credit_grant_failed",
            FailureReason::Transient { .. } => "transient",
            FailureReason::Fatal { .. } => "fatal",
            FailureReason::Interrupted => "interrupted",
        }
    }
}

/// Terminal outcome of `purchase(plan_id)`, or of a settlement the store
/// delivered outside an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOutcome {
    /// Credits were granted.
    Succeeded {
        plan_id: PlanId,
        credits: u32,
        transaction_id: TransactionId,
    },
    /// The attempt failed.
    Failed(FailureReason),
    /// The user cancelled in the store UI. Not an error.
    Cancelled,
    /// Another attempt is still in flight.
    Busy,
}

impl PurchaseOutcome {
    /// Whether this outcome should surface an error to the user.
    pub fn is_failure(&self) -> bool {
        matches!(self, PurchaseOutcome::Failed(_))
    }

    /// The failure reason, if any.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            PurchaseOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_post_ack_failure_needs_reconciliation() {
        let grant_failed = FailureReason::CreditGrantFailed {
            transaction_id: TransactionId::from_bytes([1; 32]),
            message: "backend down".into(),
        };
        assert!(grant_failed.needs_reconciliation());
        assert!(!grant_failed.is_retryable());

        for reason in [
            FailureReason::ConnectionUnavailable,
            FailureReason::ProductsNotLoaded,
            FailureReason::RequestError("x".into()),
            FailureReason::UnknownProduct(ProductId::new("x")),
            FailureReason::VerificationFailed("x".into()),
            FailureReason::Interrupted,
        ] {
            assert!(reason.is_retryable(), "{}", reason.kind());
            assert!(!reason.needs_reconciliation());
        }
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(!PurchaseOutcome::Cancelled.is_failure());
        assert!(PurchaseOutcome::Failed(FailureReason::ProductsNotLoaded).is_failure());
        assert_eq!(
            PurchaseOutcome::Failed(FailureReason::ProductsNotLoaded).failure(),
            Some(&FailureReason::ProductsNotLoaded)
        );
    }
}
