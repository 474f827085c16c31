//! Credit grant request and receipt.

use serde::{Deserialize, Serialize};

use modli_iap_core::{Plan, PlanId, ProductId, Transaction, TransactionId};

/// A request to add credits for one settled transaction.
///
/// `transaction_id` is the idempotency key: applying the same grant twice
/// must credit once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    pub transaction_id: TransactionId,
    pub plan_id: PlanId,
    pub product_id: ProductId,
    pub credits: u32,
}

impl CreditGrant {
    /// Grant for a transaction matched to a plan.
    pub fn for_transaction(plan: &Plan, transaction: &Transaction) -> Self {
        Self {
            transaction_id: transaction.id(),
            plan_id: plan.id.clone(),
            product_id: plan.product_id.clone(),
            credits: plan.credits,
        }
    }
}

/// Backend acknowledgment of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantReceipt {
    pub transaction_id: TransactionId,
    /// Credits added by this call. Zero for a replay.
    pub credited: u32,
    /// Balance after the grant.
    pub balance: u64,
    /// True when the transaction had already been credited.
    pub replayed: bool,
}
