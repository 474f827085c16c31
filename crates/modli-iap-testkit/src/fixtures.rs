//! Test fixtures for common scenarios.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use modli_iap_core::{
    Platform, PlanId, PlanTable, Product, ProductId, PurchaseOutcome, PurchaseState, RetryPolicy,
    Transaction, TransactionId,
};
use modli_iap_entitlement::{CreditGrant, EntitlementApplier, EntitlementError, GrantReceipt};
use modli_iap_purchase::{Availability, CatalogConfig, CoordinatorConfig, PurchaseCoordinator};
use modli_iap_store::MemoryStore;

/// How long harness helpers wait for the store before giving up.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Store catalog entries for every plan, priced in USD.
pub fn catalog_for(plans: &PlanTable) -> Vec<Product> {
    plans
        .iter()
        .map(|plan| {
            Product::new(
                plan.product_id.clone(),
                format!("${:.2}", plan.price_usd),
                format!("{:.2}", plan.price_usd),
                "USD",
            )
        })
        .collect()
}

/// A purchased, unacknowledged transaction.
pub fn purchased(platform: Platform, product_id: &str, token: &str) -> Transaction {
    Transaction::new(platform, ProductId::new(product_id), token)
}

/// A deferred-payment transaction.
pub fn pending(platform: Platform, product_id: &str, token: &str) -> Transaction {
    purchased(platform, product_id, token).with_state(PurchaseState::Pending)
}

/// Entitlement applier that records every call.
///
/// Credits each transaction once, like a real backend. Failures can be
/// injected per call or for every call.
#[derive(Debug, Default)]
pub struct RecordingApplier {
    inner: Mutex<RecordingInner>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    calls: Vec<CreditGrant>,
    credited: HashSet<TransactionId>,
    balance: u64,
    queued_failures: VecDeque<EntitlementError>,
    failing: Option<EntitlementError>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: EntitlementError) {
        self.lock().queued_failures.push_back(error);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_failing(&self, error: Option<EntitlementError>) {
        self.lock().failing = error;
    }

    /// Number of grant calls, successful or not.
    pub fn grant_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Every grant call in order.
    pub fn grants(&self) -> Vec<CreditGrant> {
        self.lock().calls.clone()
    }

    /// Credits granted so far.
    pub fn balance(&self) -> u64 {
        self.lock().balance
    }

    /// Whether a transaction has been credited.
    pub fn is_credited(&self, id: &TransactionId) -> bool {
        self.lock().credited.contains(id)
    }
}

#[async_trait]
impl EntitlementApplier for RecordingApplier {
    async fn grant(&self, grant: &CreditGrant) -> modli_iap_entitlement::Result<GrantReceipt> {
        let mut inner = self.lock();
        inner.calls.push(grant.clone());

        if let Some(error) = inner.queued_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = inner.failing.clone() {
            return Err(error);
        }

        let replayed = !inner.credited.insert(grant.transaction_id);
        let credited = if replayed { 0 } else { grant.credits };
        inner.balance += u64::from(credited);
        Ok(GrantReceipt {
            transaction_id: grant.transaction_id,
            credited,
            balance: inner.balance,
            replayed,
        })
    }
}

/// The coordinator type the harness drives.
pub type HarnessCoordinator = PurchaseCoordinator<Arc<MemoryStore>, Arc<RecordingApplier>>;

/// A `MemoryStore` and `RecordingApplier` wired to a coordinator.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub applier: Arc<RecordingApplier>,
    pub coordinator: HarnessCoordinator,
}

impl Harness {
    /// Builtin plans, a matching catalog, no recovery retry delays.
    pub fn new() -> Self {
        Self::with_config(
            PlanTable::builtin(),
            CoordinatorConfig::default().with_retry(RetryPolicy::none()),
        )
    }

    /// Custom plan table and coordinator configuration.
    pub fn with_config(plans: PlanTable, config: CoordinatorConfig) -> Self {
        let store = Arc::new(MemoryStore::new().with_products(catalog_for(&plans)));
        let applier = Arc::new(RecordingApplier::new());
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&applier),
            plans,
            config,
            CatalogConfig::default(),
        );
        Self {
            store,
            applier,
            coordinator,
        }
    }

    /// A default harness, initialized.
    pub async fn start() -> anyhow::Result<Self> {
        let harness = Self::new();
        match harness.coordinator.initialize().await? {
            Availability::Ready => Ok(harness),
            Availability::Unavailable => bail!("memory store refused to connect"),
        }
    }

    /// Start a purchase on a background task.
    pub fn spawn_purchase(
        &self,
        plan_id: &PlanId,
    ) -> JoinHandle<modli_iap_purchase::Result<PurchaseOutcome>> {
        let coordinator = self.coordinator.clone();
        let plan_id = plan_id.clone();
        tokio::spawn(async move { coordinator.purchase(&plan_id).await })
    }

    /// Wait for the store to receive a purchase request.
    pub async fn next_request(&self) -> anyhow::Result<ProductId> {
        tokio::time::timeout(STEP_TIMEOUT, self.store.next_request())
            .await
            .context("store never received a purchase request")?
            .ok_or_else(|| anyhow!("request channel closed"))
    }

    /// Buy `plan_id` end to end: request, complete in the store, await outcome.
    pub async fn buy(&self, plan_id: &PlanId) -> anyhow::Result<(PurchaseOutcome, Transaction)> {
        let attempt = self.spawn_purchase(plan_id);
        let product = self.next_request().await?;
        let transaction = self.store.complete_purchase(&product);
        let outcome = tokio::time::timeout(STEP_TIMEOUT, attempt)
            .await
            .context("purchase never resolved")???;
        Ok((outcome, transaction))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
