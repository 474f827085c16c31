//! PurchaseCoordinator: the purchase state machine.
//!
//! Drives one attempt at a time from request to credited (or failed), and
//! settles every transaction the store reports, whether it belongs to the
//! current attempt, a redelivery, or a recovery pass.
//!
//! ## Synchronization
//!
//! - `state` guards the phase and the current attempt. A `RequestWindow`
//!   owns its guard across the store's `request_purchase` call, so an event
//!   for the request cannot be handled before the attempt is recorded. If the
//!   caller's future is dropped inside the window, dropping the window
//!   returns the phase to `Ready`.
//! - `settle_gate` serializes settlement. Store events and recovery passes
//!   queue on it rather than run concurrently. The bounded `settled` set
//!   checked under it turns redeliveries of recent transactions into no-ops;
//!   older ones fall through to the entitlement backend, which grants once
//!   per transaction id.
//! - Lock order is always `settle_gate` then `state`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard};

use modli_iap_core::{
    codes, retry, ErrorClass, FailureReason, Plan, PlanId, PlanTable, PurchaseOutcome,
    StoreErrorEvent, StoreEvent, Transaction, TransactionId,
};
use modli_iap_entitlement::{CreditGrant, EntitlementApplier};
use modli_iap_store::{StoreError, StoreGateway};

use crate::catalog::{CatalogCache, CatalogSnapshot};
use crate::config::{CatalogConfig, CoordinatorConfig};
use crate::error::{CoordinatorError, Result};
use crate::listener::{EventHandler, TransactionListener};
use crate::report::RecoveryReport;
use crate::state::{Availability, Phase};

/// Coordinates purchases against one store gateway.
///
/// Cheap to clone; clones share the same state machine.
pub struct PurchaseCoordinator<G, A> {
    inner: Arc<Inner<G, A>>,
}

impl<G, A> Clone for PurchaseCoordinator<G, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<G, A> {
    gateway: G,
    applier: A,
    plans: PlanTable,
    catalog: CatalogCache,
    config: CoordinatorConfig,
    state: Mutex<State>,
    settle_gate: Mutex<()>,
    init_gate: Mutex<()>,
    listener: Mutex<TransactionListener>,
    outcomes: broadcast::Sender<PurchaseOutcome>,
}

struct State {
    phase: Phase,
    attempt: Option<Attempt>,
    /// Transactions acknowledged by this coordinator.
    settled: SettledSet,
    connected: bool,
    last_outcome: Option<PurchaseOutcome>,
}

struct Attempt {
    plan: Plan,
    reply: oneshot::Sender<PurchaseOutcome>,
}

/// Recently settled transaction ids, oldest evicted first.
///
/// Evicted ids stay safe: the store reports them as acknowledged, and the
/// entitlement backend keys grants by transaction id.
struct SettledSet {
    ids: HashSet<TransactionId>,
    order: VecDeque<TransactionId>,
    capacity: usize,
}

impl SettledSet {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &TransactionId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: TransactionId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// The `Requesting` phase, held for the duration of one `request_purchase`.
///
/// Owns the state guard. Unless [`RequestWindow::accept`] records the
/// attempt, dropping the window puts the phase back to `Ready`.
struct RequestWindow<'a> {
    state: MutexGuard<'a, State>,
    accepted: bool,
}

impl<'a> RequestWindow<'a> {
    fn open(mut state: MutexGuard<'a, State>) -> Self {
        state.phase = Phase::Requesting;
        Self {
            state,
            accepted: false,
        }
    }

    fn accept(mut self, plan: Plan) -> oneshot::Receiver<PurchaseOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.state.attempt = Some(Attempt { plan, reply });
        self.state.phase = Phase::AwaitingEvent;
        self.accepted = true;
        outcome
    }
}

impl Drop for RequestWindow<'_> {
    fn drop(&mut self) {
        if !self.accepted && self.state.phase == Phase::Requesting {
            tracing::debug!("purchase request abandoned before the store answered");
            self.state.phase = Phase::Ready;
        }
    }
}

/// How a store event reached settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Event,
    Recovery,
}

/// What settling one transaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Credited,
    AlreadySettled,
    Pending,
    UnknownProduct,
    AcknowledgeFailed,
    GrantFailed,
    Ignored,
}

impl<G, A> PurchaseCoordinator<G, A>
where
    G: StoreGateway + 'static,
    A: EntitlementApplier + 'static,
{
    /// Create a coordinator. Nothing touches the store until `initialize`.
    pub fn new(
        gateway: G,
        applier: A,
        plans: PlanTable,
        config: CoordinatorConfig,
        catalog: CatalogConfig,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(config.outcome_buffer.max(1));
        let settled = SettledSet::new(config.settled_capacity);
        Self {
            inner: Arc::new(Inner {
                gateway,
                applier,
                plans,
                catalog: CatalogCache::new(catalog),
                config,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    attempt: None,
                    settled,
                    connected: false,
                    last_outcome: None,
                }),
                settle_gate: Mutex::new(()),
                init_gate: Mutex::new(()),
                listener: Mutex::new(TransactionListener::new()),
                outcomes,
            }),
        }
    }

    /// Connect, subscribe to store events and load the catalog.
    ///
    /// Safe to call again after `Unavailable`. Returns `Ready` immediately if
    /// already initialized.
    pub async fn initialize(&self) -> Result<Availability> {
        self.inner.initialize().await
    }

    /// Products for the plan table, refreshing the catalog if needed.
    pub async fn list_products(&self) -> Result<CatalogSnapshot> {
        self.inner.list_products().await
    }

    /// Buy `plan_id`. Resolves once the store reports a result.
    pub async fn purchase(&self, plan_id: &PlanId) -> Result<PurchaseOutcome> {
        self.inner.purchase(plan_id).await
    }

    /// Replay purchases the store completed but the client never finished.
    pub async fn resume(&self) -> Result<RecoveryReport> {
        self.inner.resume().await
    }

    /// Tear down: fail any waiting attempt, unsubscribe, then disconnect.
    pub async fn dispose(&self) {
        self.inner.dispose().await
    }

    /// Stream of every terminal outcome, including settlements outside an
    /// attempt.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<PurchaseOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Current phase.
    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase
    }

    /// The most recent terminal outcome.
    pub async fn last_outcome(&self) -> Option<PurchaseOutcome> {
        self.inner.state.lock().await.last_outcome.clone()
    }

    /// The configured plan table.
    pub fn plans(&self) -> &PlanTable {
        &self.inner.plans
    }

    /// The catalog cache.
    pub fn catalog(&self) -> &CatalogCache {
        &self.inner.catalog
    }
}

impl<G, A> Inner<G, A>
where
    G: StoreGateway + 'static,
    A: EntitlementApplier + 'static,
{
    async fn initialize(self: &Arc<Self>) -> Result<Availability> {
        let _init = self.init_gate.lock().await;

        {
            let mut state = self.state.lock().await;
            match state.phase {
                Phase::Disposed => return Err(CoordinatorError::Disposed),
                Phase::Idle | Phase::Initializing | Phase::Unavailable => {
                    state.phase = Phase::Initializing;
                }
                _ => return Ok(Availability::Ready),
            }
        }

        tracing::debug!("connecting to store");
        if let Err(e) = self.gateway.connect().await {
            tracing::warn!(error = %e, "store unavailable; purchasing disabled");
            let mut state = self.state.lock().await;
            if state.phase == Phase::Initializing {
                state.phase = Phase::Unavailable;
            }
            return Ok(Availability::Unavailable);
        }

        {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Disposed {
                drop(state);
                self.gateway.disconnect().await;
                return Err(CoordinatorError::Disposed);
            }
            state.connected = true;
        }

        self.listener.lock().await.subscribe(&self.gateway, self);

        let snapshot = self
            .catalog
            .fetch_or_refresh(&self.gateway, &self.plans.product_ids())
            .await;

        {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Disposed {
                drop(state);
                self.listener.lock().await.unsubscribe().await;
                return Err(CoordinatorError::Disposed);
            }
            state.phase = Phase::Ready;
        }
        tracing::info!(
            plans = self.plans.len(),
            products = snapshot.products.len(),
            stale = snapshot.stale,
            "purchases ready"
        );

        if self.config.recover_on_initialize {
            match self.resume().await {
                Ok(report) if report.found > 0 => {
                    tracing::info!(?report, "recovered unfinished purchases")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "recovery at initialize failed"),
            }
        }

        Ok(Availability::Ready)
    }

    async fn list_products(self: &Arc<Self>) -> Result<CatalogSnapshot> {
        let ids = self.plans.product_ids();
        match self.ensure_initialized().await? {
            Availability::Ready => Ok(self.catalog.fetch_or_refresh(&self.gateway, &ids).await),
            Availability::Unavailable => {
                let mut snapshot = self.catalog.snapshot(&ids);
                snapshot.stale = true;
                Ok(snapshot)
            }
        }
    }

    async fn ensure_initialized(self: &Arc<Self>) -> Result<Availability> {
        let phase = self.state.lock().await.phase;
        match phase {
            Phase::Disposed => Err(CoordinatorError::Disposed),
            Phase::Idle | Phase::Initializing => self.initialize().await,
            Phase::Unavailable => Ok(Availability::Unavailable),
            _ => Ok(Availability::Ready),
        }
    }

    async fn purchase(self: &Arc<Self>, plan_id: &PlanId) -> Result<PurchaseOutcome> {
        if self.ensure_initialized().await? == Availability::Unavailable {
            return Ok(PurchaseOutcome::Failed(FailureReason::ConnectionUnavailable));
        }

        let reply = {
            let mut state = self.state.lock().await;
            match state.phase {
                Phase::Ready => {}
                Phase::Disposed => return Err(CoordinatorError::Disposed),
                Phase::Unavailable => {
                    return Ok(PurchaseOutcome::Failed(
                        FailureReason::ConnectionUnavailable,
                    ))
                }
                phase => {
                    tracing::debug!(?phase, %plan_id, "purchase refused; attempt in flight");
                    return Ok(PurchaseOutcome::Busy);
                }
            }

            let Some(plan) = self.plans.get(plan_id).cloned() else {
                tracing::warn!(%plan_id, "purchase of unknown plan");
                let outcome = PurchaseOutcome::Failed(FailureReason::UnknownPlan(plan_id.clone()));
                self.record(&mut state, &outcome);
                return Ok(outcome);
            };

            if !self.catalog.is_purchasable(&plan.product_id) {
                tracing::info!(%plan_id, product_id = %plan.product_id, "products not loaded");
                let outcome = PurchaseOutcome::Failed(FailureReason::ProductsNotLoaded);
                self.record(&mut state, &outcome);
                return Ok(outcome);
            }

            let mut window = RequestWindow::open(state);
            tracing::debug!(%plan_id, product_id = %plan.product_id, "requesting purchase");

            if let Err(e) = self.gateway.request_purchase(&plan.product_id).await {
                let outcome = request_failure_outcome(&e);
                match &outcome {
                    PurchaseOutcome::Cancelled => {
                        tracing::info!(%plan_id, "purchase cancelled")
                    }
                    _ => tracing::warn!(%plan_id, error = %e, "purchase request rejected"),
                }
                if window.state.phase == Phase::Requesting {
                    window.state.phase = Phase::Ready;
                }
                self.record(&mut window.state, &outcome);
                return Ok(outcome);
            }

            window.accept(plan)
        };

        Ok(reply
            .await
            .unwrap_or(PurchaseOutcome::Failed(FailureReason::Interrupted)))
    }

    async fn resume(self: &Arc<Self>) -> Result<RecoveryReport> {
        match self.state.lock().await.phase {
            Phase::Disposed => return Err(CoordinatorError::Disposed),
            Phase::Idle | Phase::Initializing | Phase::Unavailable => {
                return Err(CoordinatorError::NotReady)
            }
            _ => {}
        }

        let transactions = retry(
            &self.config.retry,
            "available_purchases",
            StoreError::is_transient,
            || self.gateway.available_purchases(),
        )
        .await?;

        let mut report = RecoveryReport {
            found: transactions.len(),
            ..RecoveryReport::default()
        };

        for transaction in transactions {
            if transaction.acknowledged {
                report.skipped += 1;
                continue;
            }
            match self.settle(transaction, Source::Recovery).await {
                Settlement::Credited => report.settled += 1,
                Settlement::AlreadySettled | Settlement::Pending | Settlement::Ignored => {
                    report.skipped += 1
                }
                Settlement::UnknownProduct => report.unknown += 1,
                Settlement::AcknowledgeFailed | Settlement::GrantFailed => report.failed += 1,
            }
        }

        tracing::debug!(?report, "recovery pass complete");
        Ok(report)
    }

    async fn dispose(&self) {
        let was_connected = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Disposed {
                return;
            }
            state.phase = Phase::Disposed;
            if let Some(attempt) = state.attempt.take() {
                let outcome = PurchaseOutcome::Failed(FailureReason::Interrupted);
                let _ = attempt.reply.send(outcome.clone());
                self.record(&mut state, &outcome);
            }
            std::mem::replace(&mut state.connected, false)
        };

        self.listener.lock().await.unsubscribe().await;
        if was_connected {
            self.gateway.disconnect().await;
        }
        tracing::info!("purchases disposed");
    }

    /// Acknowledge and credit one store-reported transaction.
    async fn settle(&self, transaction: Transaction, source: Source) -> Settlement {
        let _gate = self.settle_gate.lock().await;
        let id = transaction.id();

        let (plan, owns_attempt) = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Disposed {
                return Settlement::Ignored;
            }
            if state.settled.contains(&id) {
                tracing::debug!(transaction_id = %id, "transaction already settled");
                return Settlement::AlreadySettled;
            }

            let awaiting = state.attempt.as_ref().map(|a| a.plan.product_id.clone());
            if transaction.acknowledged {
                if awaiting.as_ref() == Some(&transaction.product_id) {
                    tracing::warn!(
                        transaction_id = %id,
                        product_id = %transaction.product_id,
                        "awaited purchase arrived already acknowledged; not crediting"
                    );
                    let outcome = PurchaseOutcome::Failed(FailureReason::Fatal {
                        code: codes::ALREADY_OWNED.to_string(),
                        message: "transaction already acknowledged".to_string(),
                    });
                    self.resolve_attempt(&mut state, outcome);
                } else {
                    tracing::debug!(transaction_id = %id, "transaction already acknowledged");
                }
                return Settlement::AlreadySettled;
            }

            let Some(plan) = self.plans.by_product(&transaction.product_id).cloned() else {
                tracing::error!(
                    transaction_id = %id,
                    product_id = %transaction.product_id,
                    "store reported a product no plan claims; leaving it unacknowledged"
                );
                let outcome = PurchaseOutcome::Failed(FailureReason::UnknownProduct(
                    transaction.product_id.clone(),
                ));
                match source {
                    Source::Event if awaiting.is_some() => self.resolve_attempt(&mut state, outcome),
                    Source::Event => self.record(&mut state, &outcome),
                    Source::Recovery => {}
                }
                return Settlement::UnknownProduct;
            };
            let owns_attempt = awaiting.as_ref() == Some(&plan.product_id);

            if transaction.is_pending() {
                tracing::info!(
                    transaction_id = %id,
                    plan_id = %plan.id,
                    "payment pending; waiting for the store to complete it"
                );
                if owns_attempt {
                    let outcome = PurchaseOutcome::Failed(FailureReason::Transient {
                        code: codes::DEFERRED_PAYMENT.to_string(),
                        message: "payment pending".to_string(),
                    });
                    self.resolve_attempt(&mut state, outcome);
                }
                return Settlement::Pending;
            }

            if matches!(state.phase, Phase::Ready | Phase::AwaitingEvent) {
                state.phase = Phase::Acknowledging;
            }
            (plan, owns_attempt)
        };

        tracing::debug!(transaction_id = %id, plan_id = %plan.id, ?source, "acknowledging");
        if let Err(e) = self.gateway.acknowledge(&transaction).await {
            tracing::warn!(
                transaction_id = %id,
                plan_id = %plan.id,
                error = %e,
                "acknowledge failed; store will redeliver"
            );
            let outcome = PurchaseOutcome::Failed(FailureReason::VerificationFailed(e.to_string()));
            self.finish(owns_attempt, outcome).await;
            return Settlement::AcknowledgeFailed;
        }

        {
            let mut state = self.state.lock().await;
            state.settled.insert(id);
            if state.phase == Phase::Acknowledging {
                state.phase = Phase::Crediting;
            }
        }

        let grant = CreditGrant::for_transaction(&plan, &transaction);
        let (outcome, settlement) = match self.applier.grant(&grant).await {
            Ok(_) => {
                tracing::info!(
                    transaction_id = %id,
                    plan_id = %plan.id,
                    credits = plan.credits,
                    "purchase credited"
                );
                let outcome = PurchaseOutcome::Succeeded {
                    plan_id: plan.id.clone(),
                    credits: plan.credits,
                    transaction_id: id,
                };
                (outcome, Settlement::Credited)
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %id,
                    plan_id = %plan.id,
                    credits = plan.credits,
                    error = %e,
                    "credit grant failed after acknowledge; needs reconciliation"
                );
                let outcome = PurchaseOutcome::Failed(FailureReason::CreditGrantFailed {
                    transaction_id: id,
                    message: e.to_string(),
                });
                (outcome, Settlement::GrantFailed)
            }
        };

        self.finish(owns_attempt, outcome).await;
        settlement
    }

    async fn on_store_error(&self, event: StoreErrorEvent) {
        let _gate = self.settle_gate.lock().await;
        let mut state = self.state.lock().await;

        if state.phase != Phase::AwaitingEvent || state.attempt.is_none() {
            tracing::debug!(code = %event.code, phase = ?state.phase, "store error with no purchase awaiting");
            return;
        }

        let outcome = match event.class() {
            ErrorClass::Cancelled => {
                tracing::info!("purchase cancelled by user");
                PurchaseOutcome::Cancelled
            }
            ErrorClass::Transient => {
                tracing::warn!(code = %event.code, message = %event.message, "purchase failed");
                PurchaseOutcome::Failed(FailureReason::Transient {
                    code: event.code,
                    message: event.message,
                })
            }
            ErrorClass::Fatal => {
                tracing::error!(code = %event.code, message = %event.message, "purchase failed");
                PurchaseOutcome::Failed(FailureReason::Fatal {
                    code: event.code,
                    message: event.message,
                })
            }
        };
        self.resolve_attempt(&mut state, outcome);
    }

    /// Record a settlement's outcome and restore the phase.
    async fn finish(&self, owns_attempt: bool, outcome: PurchaseOutcome) {
        let mut state = self.state.lock().await;
        if owns_attempt {
            self.resolve_attempt(&mut state, outcome);
        } else {
            self.record(&mut state, &outcome);
            restore_phase(&mut state);
        }
    }

    /// Reply to the waiting attempt, if any, and return to `Ready`.
    fn resolve_attempt(&self, state: &mut State, outcome: PurchaseOutcome) {
        if let Some(attempt) = state.attempt.take() {
            let _ = attempt.reply.send(outcome.clone());
        }
        self.record(state, &outcome);
        restore_phase(state);
    }

    fn record(&self, state: &mut State, outcome: &PurchaseOutcome) {
        state.last_outcome = Some(outcome.clone());
        // No subscribers is fine.
        let _ = self.outcomes.send(outcome.clone());
    }
}

/// Leave a busy phase once a settlement or attempt is done. Phases outside
/// the attempt cycle (initializing, disposed) are left alone.
fn restore_phase(state: &mut State) {
    if !state.phase.is_busy() {
        return;
    }
    state.phase = if state.attempt.is_some() {
        Phase::AwaitingEvent
    } else {
        Phase::Ready
    };
}

fn request_failure_outcome(error: &StoreError) -> PurchaseOutcome {
    match error.code() {
        Some(code) if ErrorClass::classify(code) == ErrorClass::Cancelled => {
            PurchaseOutcome::Cancelled
        }
        _ => PurchaseOutcome::Failed(FailureReason::RequestError(error.to_string())),
    }
}

#[async_trait]
impl<G, A> EventHandler for Inner<G, A>
where
    G: StoreGateway + 'static,
    A: EntitlementApplier + 'static,
{
    async fn handle(&self, event: StoreEvent) {
        match event {
            StoreEvent::PurchaseUpdated(transaction) => {
                self.settle(transaction, Source::Event).await;
            }
            StoreEvent::PurchaseFailed(error) => self.on_store_error(error).await,
        }
    }
}

impl<G, A> std::fmt::Debug for PurchaseCoordinator<G, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseCoordinator")
            .field("plans", &self.inner.plans.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use modli_iap_core::{Platform, Product, ProductId, PurchaseState, RetryPolicy};
    use modli_iap_entitlement::{AuthenticatedApplier, CreditLedger, StaticSession};
    use modli_iap_store::{EventStream, MemoryStore};

    type Applier = AuthenticatedApplier<StaticSession, CreditLedger>;
    type Coordinator = PurchaseCoordinator<Arc<MemoryStore>, Arc<Applier>>;

    fn catalog() -> Vec<Product> {
        PlanTable::builtin()
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

    fn setup_with(config: CoordinatorConfig) -> (Arc<MemoryStore>, Arc<Applier>, Coordinator) {
        let store = Arc::new(MemoryStore::new().with_products(catalog()));
        let applier = Arc::new(
            AuthenticatedApplier::new(StaticSession::signed_in("token"), CreditLedger::new())
                .with_session_retry(RetryPolicy::none()),
        );
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&applier),
            PlanTable::builtin(),
            config,
            CatalogConfig::default(),
        );
        (store, applier, coordinator)
    }

    fn setup() -> (Arc<MemoryStore>, Arc<Applier>, Coordinator) {
        setup_with(CoordinatorConfig::default().with_retry(RetryPolicy::none()))
    }

    fn standard() -> PlanId {
        PlanId::new("standard")
    }

    fn spawn_purchase(
        coordinator: &Coordinator,
        plan: PlanId,
    ) -> tokio::task::JoinHandle<Result<PurchaseOutcome>> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.purchase(&plan).await })
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<PurchaseOutcome>) -> PurchaseOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no outcome within timeout")
            .expect("outcome channel closed")
    }

    #[tokio::test]
    async fn test_initialize_connects_and_subscribes_once() {
        let (store, _, coordinator) = setup();
        assert_eq!(coordinator.initialize().await.unwrap(), Availability::Ready);
        assert_eq!(coordinator.initialize().await.unwrap(), Availability::Ready);

        assert_eq!(coordinator.phase().await, Phase::Ready);
        assert!(store.is_connected());
        assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 1);
        assert_eq!(store.listener_count(EventStream::PurchaseError), 1);
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_disables_purchasing() {
        let (store, _, coordinator) = setup();
        store.set_reachable(false);

        assert_eq!(
            coordinator.initialize().await.unwrap(),
            Availability::Unavailable
        );
        assert_eq!(
            coordinator.purchase(&standard()).await.unwrap(),
            PurchaseOutcome::Failed(FailureReason::ConnectionUnavailable)
        );
        assert!(store.requests().is_empty());

        store.set_reachable(true);
        assert_eq!(coordinator.initialize().await.unwrap(), Availability::Ready);
    }

    #[tokio::test]
    async fn test_purchase_acknowledges_and_credits_once() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        assert_eq!(product, ProductId::new("modli_standard"));
        let transaction = store.complete_purchase(&product);

        let outcome = attempt.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            PurchaseOutcome::Succeeded {
                plan_id: standard(),
                credits: 50,
                transaction_id: transaction.id(),
            }
        );
        assert_eq!(applier.backend().entries().len(), 1);
        assert_eq!(applier.backend().balance(), 50);
        assert!(store.is_finished(&transaction.id()));
        assert_eq!(coordinator.phase().await, Phase::Ready);
    }

    #[tokio::test]
    async fn test_second_purchase_while_awaiting_is_busy() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let first = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();

        assert_eq!(
            coordinator.purchase(&PlanId::new("basic")).await.unwrap(),
            PurchaseOutcome::Busy
        );
        assert_eq!(coordinator.phase().await, Phase::AwaitingEvent);
        assert_eq!(store.requests().len(), 1);

        store.emit_error(codes::USER_CANCELLED, "closed");
        assert_eq!(first.await.unwrap().unwrap(), PurchaseOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_event_is_not_a_failure() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();
        let mut outcomes = coordinator.subscribe_outcomes();

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();
        store.emit_error(codes::USER_CANCELLED_LEGACY, "closed");

        assert_eq!(attempt.await.unwrap().unwrap(), PurchaseOutcome::Cancelled);
        assert_eq!(next_outcome(&mut outcomes).await, PurchaseOutcome::Cancelled);
        assert!(outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_events_are_classified() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();
        store.emit_error(codes::NETWORK_ERROR, "offline");
        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(FailureReason::Transient { code, .. }) if code == codes::NETWORK_ERROR
        ));

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();
        store.emit_error(codes::DEVELOPER_ERROR, "bad sku");
        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(outcome.failure(), Some(FailureReason::Fatal { .. })));
    }

    #[tokio::test]
    async fn test_unknown_product_is_left_unacknowledged() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();
        let stray = Transaction::new(Platform::Android, ProductId::new("modli_mystery"), "tok-x");
        store.emit_update(stray.clone());

        assert_eq!(
            attempt.await.unwrap().unwrap(),
            PurchaseOutcome::Failed(FailureReason::UnknownProduct(ProductId::new(
                "modli_mystery"
            )))
        );
        assert_eq!(store.acknowledge_calls(), 0);
        assert!(!store.is_acknowledged(&stray.id()));
        assert!(applier.backend().entries().is_empty());
        assert_eq!(coordinator.phase().await, Phase::Ready);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_leaves_transaction_for_redelivery() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();
        let mut outcomes = coordinator.subscribe_outcomes();
        store.set_acknowledge_failure(Some("play services down".into()));

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        let transaction = store.complete_purchase(&product);

        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(FailureReason::VerificationFailed(_))
        ));
        assert!(outcome.failure().unwrap().is_retryable());
        assert!(!store.is_finished(&transaction.id()));
        assert!(applier.backend().entries().is_empty());
        next_outcome(&mut outcomes).await;

        // The store redelivers; this time it settles outside any attempt.
        store.set_acknowledge_failure(None);
        store.emit_update(transaction.clone());
        assert!(matches!(
            next_outcome(&mut outcomes).await,
            PurchaseOutcome::Succeeded { credits: 50, .. }
        ));
        assert_eq!(applier.backend().balance(), 50);
    }

    #[tokio::test]
    async fn test_grant_failure_is_not_retried() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();
        let mut outcomes = coordinator.subscribe_outcomes();
        applier.backend().set_outage(Some("503".into()));

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        let transaction = store.complete_purchase(&product);

        let outcome = attempt.await.unwrap().unwrap();
        let reason = outcome.failure().unwrap();
        assert!(reason.needs_reconciliation());
        assert!(store.is_finished(&transaction.id()));
        next_outcome(&mut outcomes).await;

        // A redelivery of the consumed transaction must not trigger a grant.
        applier.backend().set_outage(None);
        store.emit_update(transaction);
        let marker = store.complete_purchase(&ProductId::new("modli_basic"));
        match next_outcome(&mut outcomes).await {
            PurchaseOutcome::Succeeded { transaction_id, .. } => {
                assert_eq!(transaction_id, marker.id())
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(applier.backend().balance(), 20);
    }

    #[tokio::test]
    async fn test_stale_catalog_rejects_without_store_call() {
        let (store, _, coordinator) = setup();
        store.set_catalog_available(false);
        coordinator.initialize().await.unwrap();

        let listing = coordinator.list_products().await.unwrap();
        assert!(listing.stale);
        assert!(listing.products.is_empty());

        assert_eq!(
            coordinator.purchase(&standard()).await.unwrap(),
            PurchaseOutcome::Failed(FailureReason::ProductsNotLoaded)
        );
        assert!(store.requests().is_empty());
        assert_eq!(coordinator.phase().await, Phase::Ready);
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let (store, _, coordinator) = setup();
        assert_eq!(
            coordinator.purchase(&PlanId::new("gold")).await.unwrap(),
            PurchaseOutcome::Failed(FailureReason::UnknownPlan(PlanId::new("gold")))
        );
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_synchronous_request_failures() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        store.fail_next_request(codes::USER_CANCELLED, "sheet dismissed");
        assert_eq!(
            coordinator.purchase(&standard()).await.unwrap(),
            PurchaseOutcome::Cancelled
        );

        store.fail_next_request(codes::ITEM_UNAVAILABLE, "not for sale");
        let outcome = coordinator.purchase(&standard()).await.unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(FailureReason::RequestError(_))
        ));
        assert_eq!(coordinator.phase().await, Phase::Ready);
    }

    #[tokio::test]
    async fn test_pending_payment_is_not_credited() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        let pending = Transaction::new(Platform::Android, product, "deferred-1")
            .with_state(PurchaseState::Pending);
        store.emit_update(pending.clone());

        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(FailureReason::Transient { code, .. }) if code == codes::DEFERRED_PAYMENT
        ));
        assert!(!store.is_finished(&pending.id()));
        assert!(applier.backend().entries().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_recovery_settles_once() {
        let (store, applier, coordinator) = setup_with(
            CoordinatorConfig::default()
                .with_retry(RetryPolicy::none())
                .with_recover_on_initialize(false),
        );
        coordinator.initialize().await.unwrap();
        let missed = store.complete_silently(&ProductId::new("modli_premium"));

        let (a, b) = tokio::join!(coordinator.resume(), coordinator.resume());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.settled + b.settled, 1);
        assert_eq!(store.acknowledge_calls(), 1);
        assert_eq!(applier.backend().entries().len(), 1);
        assert_eq!(applier.backend().balance(), 110);
        assert!(store.is_finished(&missed.id()));
    }

    #[tokio::test]
    async fn test_initialize_recovers_missed_purchase() {
        let (store, applier, coordinator) = setup();
        store.connect().await.unwrap();
        store.complete_silently(&ProductId::new("modli_basic"));

        coordinator.initialize().await.unwrap();
        assert_eq!(applier.backend().balance(), 20);
        assert!(store.available_purchases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_resolves_waiting_attempt() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        // The app was suspended and the update never arrived.
        store.complete_silently(&product);

        let report = coordinator.resume().await.unwrap();
        assert_eq!(report.settled, 1);
        assert!(matches!(
            attempt.await.unwrap().unwrap(),
            PurchaseOutcome::Succeeded { credits: 50, .. }
        ));
    }

    #[tokio::test]
    async fn test_resume_retries_transient_query_failures() {
        let (store, _, coordinator) = setup_with(
            CoordinatorConfig::default()
                .with_retry(RetryPolicy::default().with_base_delay(Duration::from_millis(1)))
                .with_recover_on_initialize(false),
        );
        coordinator.initialize().await.unwrap();
        store.fail_queries(2);
        assert!(coordinator.resume().await.unwrap().is_clean());

        store.fail_queries(3);
        assert!(matches!(
            coordinator.resume().await,
            Err(CoordinatorError::Store(StoreError::Query(_)))
        ));
    }

    #[tokio::test]
    async fn test_resume_before_initialize_is_not_ready() {
        let (_, _, coordinator) = setup();
        assert!(matches!(
            coordinator.resume().await,
            Err(CoordinatorError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_credits_once() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();
        let mut outcomes = coordinator.subscribe_outcomes();

        let transaction = store.complete_silently(&ProductId::new("modli_standard"));
        store.emit_update(transaction.clone());
        store.emit_update(transaction.clone());
        let marker = store.complete_purchase(&ProductId::new("modli_basic"));

        let mut credited = Vec::new();
        while credited.len() < 2 {
            if let PurchaseOutcome::Succeeded { transaction_id, .. } =
                next_outcome(&mut outcomes).await
            {
                credited.push(transaction_id);
            }
        }
        assert_eq!(credited, vec![transaction.id(), marker.id()]);
        assert_eq!(applier.backend().balance(), 70);
    }

    #[tokio::test]
    async fn test_dispose_interrupts_and_tears_down_in_order() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();

        coordinator.dispose().await;
        assert_eq!(
            attempt.await.unwrap().unwrap(),
            PurchaseOutcome::Failed(FailureReason::Interrupted)
        );
        assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 0);
        assert_eq!(store.listener_count(EventStream::PurchaseError), 0);
        assert_eq!(store.disconnect_calls(), 1);
        assert_eq!(coordinator.phase().await, Phase::Disposed);

        assert!(matches!(
            coordinator.purchase(&standard()).await,
            Err(CoordinatorError::Disposed)
        ));
        coordinator.dispose().await;
        assert_eq!(store.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_frees_the_coordinator() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();
        store.set_request_delay(Some(Duration::from_millis(200)));

        let first =
            tokio::time::timeout(Duration::from_millis(50), coordinator.purchase(&standard()))
                .await;
        assert!(first.is_err());
        assert_eq!(coordinator.phase().await, Phase::Ready);
        assert!(store.requests().is_empty());

        store.set_request_delay(None);
        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        store.complete_purchase(&product);
        assert!(matches!(
            attempt.await.unwrap().unwrap(),
            PurchaseOutcome::Succeeded { credits: 50, .. }
        ));
    }

    #[tokio::test]
    async fn test_already_acknowledged_update_ends_waiting_attempt() {
        let (store, applier, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        let product = store.next_request().await.unwrap();
        let consumed =
            Transaction::new(Platform::Android, product, "acked-1").with_acknowledged(true);
        store.emit_update(consumed);

        let outcome = attempt.await.unwrap().unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(FailureReason::Fatal { code, .. }) if code == codes::ALREADY_OWNED
        ));
        assert_eq!(store.acknowledge_calls(), 0);
        assert!(applier.backend().entries().is_empty());
        assert_eq!(coordinator.phase().await, Phase::Ready);

        let attempt = spawn_purchase(&coordinator, PlanId::new("basic"));
        let product = store.next_request().await.unwrap();
        store.complete_purchase(&product);
        assert!(matches!(
            attempt.await.unwrap().unwrap(),
            PurchaseOutcome::Succeeded { credits: 20, .. }
        ));
    }

    #[tokio::test]
    async fn test_acknowledged_update_for_other_product_keeps_waiting() {
        let (store, _, coordinator) = setup();
        coordinator.initialize().await.unwrap();

        let attempt = spawn_purchase(&coordinator, standard());
        store.next_request().await.unwrap();
        let other = Transaction::new(Platform::Android, ProductId::new("modli_basic"), "acked-2")
            .with_acknowledged(true);
        store.emit_update(other);
        store.emit_error(codes::USER_CANCELLED, "closed");

        assert_eq!(attempt.await.unwrap().unwrap(), PurchaseOutcome::Cancelled);
        assert_eq!(store.acknowledge_calls(), 0);
    }

    #[test]
    fn test_settled_set_evicts_oldest() {
        let ids: Vec<_> = (1u8..=3).map(|b| TransactionId::from_bytes([b; 32])).collect();
        let mut settled = SettledSet::new(2);
        for id in &ids {
            settled.insert(*id);
        }
        settled.insert(ids[2]);

        assert!(!settled.contains(&ids[0]));
        assert!(settled.contains(&ids[1]));
        assert!(settled.contains(&ids[2]));
        assert_eq!(settled.order.len(), 2);
    }

    #[tokio::test]
    async fn test_evicted_redelivery_does_not_credit_twice() {
        let (store, applier, coordinator) = setup_with(
            CoordinatorConfig::default()
                .with_retry(RetryPolicy::none())
                .with_settled_capacity(1),
        );
        coordinator.initialize().await.unwrap();
        let mut outcomes = coordinator.subscribe_outcomes();

        let first = store.complete_purchase(&ProductId::new("modli_basic"));
        next_outcome(&mut outcomes).await;
        store.complete_purchase(&ProductId::new("modli_standard"));
        next_outcome(&mut outcomes).await;

        store.emit_update(first.clone());
        assert!(matches!(
            next_outcome(&mut outcomes).await,
            PurchaseOutcome::Succeeded { transaction_id, .. } if transaction_id == first.id()
        ));
        assert_eq!(applier.backend().balance(), 70);
        assert_eq!(applier.backend().entries().len(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn prop_redelivered_transactions_credit_once(
                picks in prop::collection::vec((0usize..3, 1usize..4), 1..8),
            ) {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let (store, applier, coordinator) = setup();
                    coordinator.initialize().await.unwrap();
                    let mut outcomes = coordinator.subscribe_outcomes();
                    let plans: Vec<Plan> = coordinator.plans().iter().cloned().collect();

                    let mut expected = 0u64;
                    for (index, deliveries) in &picks {
                        let plan = &plans[*index];
                        let transaction = store.complete_silently(&plan.product_id);
                        for _ in 0..*deliveries {
                            store.emit_update(transaction.clone());
                        }
                        expected += u64::from(plan.credits);
                    }

                    for _ in 0..picks.len() {
                        assert!(matches!(
                            next_outcome(&mut outcomes).await,
                            PurchaseOutcome::Succeeded { .. }
                        ));
                    }
                    assert_eq!(coordinator.resume().await.unwrap().found, 0);
                    assert_eq!(applier.backend().balance(), expected);
                    assert_eq!(applier.backend().entries().len(), picks.len());
                });
            }
        }
    }
}
