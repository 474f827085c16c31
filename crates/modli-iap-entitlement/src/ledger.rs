//! Credit ledger: backend-side crediting, keyed by transaction.
//!
//! [`CreditBackend`] is the seam to the account service that owns the
//! balance. [`CreditLedger`] is the in-memory implementation. Like the real
//! service it refuses to credit the same transaction twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use modli_iap_core::TransactionId;

use crate::error::{EntitlementError, Result};
use crate::grant::{CreditGrant, GrantReceipt};
use crate::session::BearerToken;

/// Account service that adds credits to the signed-in user.
#[async_trait]
pub trait CreditBackend: Send + Sync {
    /// Add the grant's credits. Must be idempotent on `transaction_id`.
    async fn add_credits(&self, token: &BearerToken, grant: &CreditGrant) -> Result<GrantReceipt>;
}

/// A credited transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub grant: CreditGrant,
    /// Balance right after this entry was applied.
    pub balance_after: u64,
}

/// In-memory credit ledger.
#[derive(Debug, Default)]
pub struct CreditLedger {
    inner: Mutex<LedgerInner>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    balance: u64,
    entries: HashMap<TransactionId, LedgerEntry>,
    order: Vec<TransactionId>,
    required_token: Option<BearerToken>,
    outage: Option<String>,
}

impl CreditLedger {
    /// Empty ledger that accepts any token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept this token.
    pub fn with_required_token(self, token: impl Into<String>) -> Self {
        self.lock().required_token = Some(BearerToken::new(token));
        self
    }

    /// Simulate a backend outage (`None` restores service).
    pub fn set_outage(&self, message: Option<String>) {
        self.lock().outage = message;
    }

    /// Current balance.
    pub fn balance(&self) -> u64 {
        self.lock().balance
    }

    /// Whether a transaction has been credited.
    pub fn is_credited(&self, id: &TransactionId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Entries in the order they were applied.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerInner {
    fn apply(&mut self, grant: &CreditGrant) -> GrantReceipt {
        if self.entries.contains_key(&grant.transaction_id) {
            return GrantReceipt {
                transaction_id: grant.transaction_id,
                credited: 0,
                balance: self.balance,
                replayed: true,
            };
        }

        self.balance += u64::from(grant.credits);
        self.entries.insert(
            grant.transaction_id,
            LedgerEntry {
                grant: grant.clone(),
                balance_after: self.balance,
            },
        );
        self.order.push(grant.transaction_id);

        GrantReceipt {
            transaction_id: grant.transaction_id,
            credited: grant.credits,
            balance: self.balance,
            replayed: false,
        }
    }
}

#[async_trait]
impl CreditBackend for CreditLedger {
    async fn add_credits(&self, token: &BearerToken, grant: &CreditGrant) -> Result<GrantReceipt> {
        let mut inner = self.lock();
        if let Some(message) = &inner.outage {
            return Err(EntitlementError::Backend(message.clone()));
        }
        if let Some(required) = &inner.required_token {
            if required != token {
                return Err(EntitlementError::Unauthorized);
            }
        }
        if grant.credits == 0 {
            return Err(EntitlementError::Rejected("zero-credit grant".into()));
        }
        Ok(inner.apply(grant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modli_iap_core::{PlanId, ProductId};
    use proptest::prelude::*;

    fn grant(seed: u8, credits: u32) -> CreditGrant {
        CreditGrant {
            transaction_id: TransactionId::from_bytes([seed; 32]),
            plan_id: PlanId::new("standard"),
            product_id: ProductId::new("modli_standard"),
            credits,
        }
    }

    #[tokio::test]
    async fn test_credit_once_per_transaction() {
        let ledger = CreditLedger::new();
        let token = BearerToken::new("t");

        let first = ledger.add_credits(&token, &grant(1, 50)).await.unwrap();
        assert_eq!(first.credited, 50);
        assert!(!first.replayed);

        let again = ledger.add_credits(&token, &grant(1, 50)).await.unwrap();
        assert_eq!(again.credited, 0);
        assert!(again.replayed);
        assert_eq!(ledger.balance(), 50);
        assert_eq!(ledger.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let ledger = CreditLedger::new().with_required_token("good");
        let err = ledger
            .add_credits(&BearerToken::new("bad"), &grant(1, 20))
            .await
            .unwrap_err();
        assert_eq!(err, EntitlementError::Unauthorized);
        assert_eq!(ledger.balance(), 0);
    }

    #[tokio::test]
    async fn test_outage() {
        let ledger = CreditLedger::new();
        ledger.set_outage(Some("503".into()));
        let err = ledger
            .add_credits(&BearerToken::new("t"), &grant(1, 20))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!ledger.is_credited(&TransactionId::from_bytes([1; 32])));
    }

    proptest! {
        #[test]
        fn prop_balance_counts_each_transaction_once(
            seeds in prop::collection::vec(0u8..8, 0..40),
        ) {
            let mut inner = LedgerInner::default();
            for seed in &seeds {
                inner.apply(&grant(*seed, 10));
            }
            let unique: std::collections::HashSet<_> = seeds.iter().collect();
            prop_assert_eq!(inner.balance, unique.len() as u64 * 10);
        }
    }
}
