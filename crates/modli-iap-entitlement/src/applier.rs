//! EntitlementApplier: the seam the purchase coordinator credits through.

use std::sync::Arc;

use async_trait::async_trait;

use modli_iap_core::{retry, RetryPolicy};

use crate::error::{EntitlementError, Result};
use crate::grant::{CreditGrant, GrantReceipt};
use crate::ledger::CreditBackend;
use crate::session::AuthSession;

/// Grants credits for a settled transaction.
///
/// Called exactly once per acknowledged transaction. Implementations should
/// still be idempotent on `grant.transaction_id`.
#[async_trait]
pub trait EntitlementApplier: Send + Sync {
    async fn grant(&self, grant: &CreditGrant) -> Result<GrantReceipt>;
}

#[async_trait]
impl<A: EntitlementApplier + ?Sized> EntitlementApplier for Arc<A> {
    async fn grant(&self, grant: &CreditGrant) -> Result<GrantReceipt> {
        (**self).grant(grant).await
    }
}

/// Looks up the session (with bounded retry), then credits the backend.
///
/// Only the session lookup is retried. The credit call itself is made once:
/// a failure there is reported to the caller, which owns reconciliation.
pub struct AuthenticatedApplier<S, B> {
    session: S,
    backend: B,
    session_retry: RetryPolicy,
}

impl<S: AuthSession, B: CreditBackend> AuthenticatedApplier<S, B> {
    /// Create an applier with the default session retry policy.
    pub fn new(session: S, backend: B) -> Self {
        Self {
            session,
            backend,
            session_retry: RetryPolicy::default(),
        }
    }

    /// Override the session retry policy.
    pub fn with_session_retry(mut self, policy: RetryPolicy) -> Self {
        self.session_retry = policy;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<S: AuthSession, B: CreditBackend> EntitlementApplier for AuthenticatedApplier<S, B> {
    async fn grant(&self, grant: &CreditGrant) -> Result<GrantReceipt> {
        let token = retry(
            &self.session_retry,
            "session_lookup",
            EntitlementError::is_transient,
            || self.session.bearer_token(),
        )
        .await?;

        let receipt = self.backend.add_credits(&token, grant).await?;
        if receipt.replayed {
            tracing::info!(
                transaction_id = %grant.transaction_id,
                "transaction already credited"
            );
        } else {
            tracing::info!(
                transaction_id = %grant.transaction_id,
                plan_id = %grant.plan_id,
                credits = receipt.credited,
                balance = receipt.balance,
                "credits granted"
            );
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use modli_iap_core::{PlanId, ProductId, TransactionId};

    use crate::ledger::CreditLedger;
    use crate::session::{BearerToken, StaticSession};

    fn grant() -> CreditGrant {
        CreditGrant {
            transaction_id: TransactionId::from_bytes([7; 32]),
            plan_id: PlanId::new("basic"),
            product_id: ProductId::new("modli_basic"),
            credits: 20,
        }
    }

    #[tokio::test]
    async fn test_grant_credits_ledger() {
        let applier =
            AuthenticatedApplier::new(StaticSession::signed_in("tok"), CreditLedger::new());
        let receipt = applier.grant(&grant()).await.unwrap();
        assert_eq!(receipt.credited, 20);
        assert_eq!(applier.backend().balance(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_fails_after_bounded_retry() {
        let applier =
            AuthenticatedApplier::new(StaticSession::signed_out(), CreditLedger::new())
                .with_session_retry(
                    RetryPolicy::default()
                        .with_base_delay(Duration::from_millis(10))
                        .with_jitter(false),
                );
        let err = applier.grant(&grant()).await.unwrap_err();
        assert!(matches!(err, EntitlementError::SessionUnavailable(_)));
        assert_eq!(applier.backend().balance(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_retried() {
        let ledger = CreditLedger::new();
        ledger.set_outage(Some("down".into()));
        let applier = AuthenticatedApplier::new(StaticSession::signed_in("tok"), ledger);

        assert!(matches!(
            applier.grant(&grant()).await,
            Err(EntitlementError::Backend(_))
        ));

        applier.backend().set_outage(None);
        applier.grant(&grant()).await.unwrap();
        assert_eq!(applier.backend().balance(), 20);
    }

    #[tokio::test]
    async fn test_session_signs_in_between_grants() {
        let applier =
            AuthenticatedApplier::new(StaticSession::signed_out(), CreditLedger::new())
                .with_session_retry(RetryPolicy::none());
        assert!(applier.grant(&grant()).await.is_err());

        applier.session().set_token(Some(BearerToken::new("tok")));
        assert!(applier.grant(&grant()).await.is_ok());
    }
}
