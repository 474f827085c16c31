//! In-memory implementation of the StoreGateway trait.
//!
//! Simulates a platform store inside the process: a fixed catalog, purchase
//! requests that complete only when told to, and transactions that stay
//! "unfinished" until acknowledged. Failure modes can be scripted per call,
//! which is what the coordinator tests lean on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use modli_iap_core::{
    codes, Platform, Product, ProductId, StoreErrorEvent, StoreEvent, Transaction, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::traits::{EventSink, EventStream, ListenerHandle, StoreGateway};

/// What the store does on its own after accepting a purchase request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoResponse {
    /// Complete the purchase and deliver a purchase update.
    Complete,
    /// Deliver a purchase-error event with this code.
    Fail { code: String, message: String },
}

/// In-memory store gateway.
///
/// Cheap to share behind an `Arc`; all state sits behind one mutex.
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
    requests_tx: mpsc::UnboundedSender<ProductId>,
    requests_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProductId>>,
}

struct MemoryStoreInner {
    platform: Platform,
    reachable: bool,
    connected: bool,

    /// Catalog indexed by product id.
    catalog: BTreeMap<ProductId, Product>,
    catalog_available: bool,
    fetch_delay: Option<Duration>,
    request_delay: Option<Duration>,

    /// Transactions the store has reported, in delivery order.
    transactions: HashMap<TransactionId, StoredTransaction>,
    order: Vec<TransactionId>,
    next_token: u64,

    /// Scripted failures.
    request_failure: Option<StoreErrorEvent>,
    acknowledge_failure: Option<String>,
    query_failures: u32,
    auto_response: Option<AutoResponse>,

    /// Registered event sinks.
    update_sinks: HashMap<u64, EventSink>,
    error_sinks: HashMap<u64, EventSink>,
    next_listener: u64,

    /// Call counters.
    requests: Vec<ProductId>,
    fetch_calls: u32,
    acknowledge_calls: u32,
    disconnect_calls: u32,
}

struct StoredTransaction {
    transaction: Transaction,
    finished: bool,
    platform_acks: u32,
}

impl MemoryStore {
    /// Create a reachable Android store with an empty catalog.
    pub fn new() -> Self {
        Self::with_platform(Platform::Android)
    }

    /// Create a reachable store for the given platform.
    pub fn with_platform(platform: Platform) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                platform,
                reachable: true,
                connected: false,
                catalog: BTreeMap::new(),
                catalog_available: true,
                fetch_delay: None,
                request_delay: None,
                transactions: HashMap::new(),
                order: Vec::new(),
                next_token: 0,
                request_failure: None,
                acknowledge_failure: None,
                query_failures: 0,
                auto_response: None,
                update_sinks: HashMap::new(),
                error_sinks: HashMap::new(),
                next_listener: 0,
                requests: Vec::new(),
                fetch_calls: 0,
                acknowledge_calls: 0,
                disconnect_calls: 0,
            })),
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
        }
    }

    /// Builder: add catalog entries.
    pub fn with_products(self, products: impl IntoIterator<Item = Product>) -> Self {
        self.set_products(products);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        lock_inner(&self.inner)
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Replace the catalog.
    pub fn set_products(&self, products: impl IntoIterator<Item = Product>) {
        let mut inner = self.lock();
        inner.catalog = products
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();
    }

    /// When false, `fetch_products` returns an empty list.
    pub fn set_catalog_available(&self, available: bool) {
        self.lock().catalog_available = available;
    }

    /// Delay every catalog fetch.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// Delay every purchase request before the store answers it.
    pub fn set_request_delay(&self, delay: Option<Duration>) {
        self.lock().request_delay = delay;
    }

    /// When false, `connect` fails with `Unavailable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Reject the next purchase request synchronously with this code.
    pub fn fail_next_request(&self, code: impl Into<String>, message: impl Into<String>) {
        self.lock().request_failure = Some(StoreErrorEvent::new(code, message));
    }

    /// Make every acknowledge call fail (or succeed again with `None`).
    pub fn set_acknowledge_failure(&self, message: Option<String>) {
        self.lock().acknowledge_failure = message;
    }

    /// Fail the next `count` calls to `available_purchases`.
    pub fn fail_queries(&self, count: u32) {
        self.lock().query_failures = count;
    }

    /// What happens automatically after an accepted purchase request.
    pub fn set_auto_response(&self, response: Option<AutoResponse>) {
        self.lock().auto_response = response;
    }

    /// Complete a purchase of `product_id` and deliver the update.
    pub fn complete_purchase(&self, product_id: &ProductId) -> Transaction {
        let mut inner = self.lock();
        let transaction = inner.mint_transaction(product_id);
        inner.record(transaction.clone());
        inner.broadcast_update(&transaction);
        transaction
    }

    /// Record a completed purchase without delivering any event, as if the
    /// app was killed before the update arrived.
    pub fn complete_silently(&self, product_id: &ProductId) -> Transaction {
        let mut inner = self.lock();
        let transaction = inner.mint_transaction(product_id);
        inner.record(transaction.clone());
        transaction
    }

    /// Deliver a purchase update for an arbitrary transaction.
    ///
    /// The transaction is recorded as unfinished if the store has not seen it.
    pub fn emit_update(&self, transaction: Transaction) {
        let mut inner = self.lock();
        inner.record(transaction.clone());
        inner.broadcast_update(&transaction);
    }

    /// Deliver a purchase-error event.
    pub fn emit_error(&self, code: impl Into<String>, message: impl Into<String>) {
        let event = StoreErrorEvent::new(code, message);
        self.lock().broadcast_error(&event);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Wait for the next accepted purchase request.
    pub async fn next_request(&self) -> Option<ProductId> {
        self.requests_rx.lock().await.recv().await
    }

    /// Every accepted purchase request, in order.
    pub fn requests(&self) -> Vec<ProductId> {
        self.lock().requests.clone()
    }

    /// Number of `fetch_products` calls so far.
    pub fn fetch_calls(&self) -> u32 {
        self.lock().fetch_calls
    }

    /// Number of `acknowledge` calls so far, including repeats.
    pub fn acknowledge_calls(&self) -> u32 {
        self.lock().acknowledge_calls
    }

    /// Number of `disconnect` calls so far.
    pub fn disconnect_calls(&self) -> u32 {
        self.lock().disconnect_calls
    }

    /// Whether the store considers the transaction finished.
    pub fn is_finished(&self, id: &TransactionId) -> bool {
        self.lock()
            .transactions
            .get(id)
            .map(|t| t.finished)
            .unwrap_or(false)
    }

    /// Whether the store considers the transaction acknowledged.
    pub fn is_acknowledged(&self, id: &TransactionId) -> bool {
        self.lock()
            .transactions
            .get(id)
            .map(|t| t.transaction.acknowledged)
            .unwrap_or(false)
    }

    /// How many times the Play-style acknowledge actually ran for a
    /// transaction. At most one no matter how often `acknowledge` is called.
    pub fn platform_acknowledgements(&self, id: &TransactionId) -> u32 {
        self.lock()
            .transactions
            .get(id)
            .map(|t| t.platform_acks)
            .unwrap_or(0)
    }

    /// Live registrations per stream.
    pub fn listener_count(&self, stream: EventStream) -> usize {
        let inner = self.lock();
        match stream {
            EventStream::PurchaseUpdated => inner.update_sinks.len(),
            EventStream::PurchaseError => inner.error_sinks.len(),
        }
    }

    /// Whether `connect` succeeded and `disconnect` has not run since.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn register(&self, stream: EventStream, sink: EventSink) -> ListenerHandle {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            match stream {
                EventStream::PurchaseUpdated => inner.update_sinks.insert(id, sink),
                EventStream::PurchaseError => inner.error_sinks.insert(id, sink),
            };
            id
        };

        let weak: Weak<Mutex<MemoryStoreInner>> = Arc::downgrade(&self.inner);
        ListenerHandle::new(stream, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock_inner(&inner);
                match stream {
                    EventStream::PurchaseUpdated => inner.update_sinks.remove(&id),
                    EventStream::PurchaseError => inner.error_sinks.remove(&id),
                };
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_inner(inner: &Mutex<MemoryStoreInner>) -> MutexGuard<'_, MemoryStoreInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStoreInner {
    fn mint_transaction(&mut self, product_id: &ProductId) -> Transaction {
        self.next_token += 1;
        let token = format!("{}-{}-{}", self.platform.tag(), product_id, self.next_token);
        Transaction::new(self.platform, product_id.clone(), token)
            .with_purchase_time(self.next_token as i64)
    }

    fn record(&mut self, transaction: Transaction) {
        let id = transaction.id();
        if !self.transactions.contains_key(&id) {
            self.order.push(id);
            self.transactions.insert(
                id,
                StoredTransaction {
                    transaction,
                    finished: false,
                    platform_acks: 0,
                },
            );
        }
    }

    fn broadcast_update(&mut self, transaction: &Transaction) {
        // Redeliveries carry the store's current view of the transaction.
        let current = self
            .transactions
            .get(&transaction.id())
            .map(|t| t.transaction.clone())
            .unwrap_or_else(|| transaction.clone());
        self.update_sinks
            .retain(|_, sink| sink.send(StoreEvent::PurchaseUpdated(current.clone())).is_ok());
    }

    fn broadcast_error(&mut self, event: &StoreErrorEvent) {
        self.error_sinks
            .retain(|_, sink| sink.send(StoreEvent::PurchaseFailed(event.clone())).is_ok());
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn connect(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.reachable {
            tracing::debug!(platform = ?inner.platform, "memory store refused connection");
            return Err(StoreError::Unavailable("billing service unreachable".into()));
        }
        inner.connected = true;
        tracing::debug!(platform = ?inner.platform, "memory store connected");
        Ok(())
    }

    async fn fetch_products(&self, ids: &[ProductId]) -> Vec<Product> {
        let delay = {
            let mut inner = self.lock();
            inner.fetch_calls += 1;
            inner.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.lock();
        if !inner.connected || !inner.catalog_available {
            return Vec::new();
        }
        ids.iter()
            .filter_map(|id| inner.catalog.get(id).cloned())
            .collect()
    }

    async fn request_purchase(&self, product_id: &ProductId) -> Result<()> {
        let delay = self.lock().request_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if !inner.connected {
            return Err(StoreError::NotConnected);
        }
        if let Some(failure) = inner.request_failure.take() {
            return Err(StoreError::Request {
                code: failure.code,
                message: failure.message,
            });
        }
        if !inner.catalog.contains_key(product_id) {
            return Err(StoreError::Request {
                code: codes::ITEM_UNAVAILABLE.into(),
                message: format!("product {product_id} is not for sale"),
            });
        }

        inner.requests.push(product_id.clone());
        let _ = self.requests_tx.send(product_id.clone());

        match inner.auto_response.clone() {
            Some(AutoResponse::Complete) => {
                let transaction = inner.mint_transaction(product_id);
                inner.record(transaction.clone());
                inner.broadcast_update(&transaction);
            }
            Some(AutoResponse::Fail { code, message }) => {
                inner.broadcast_error(&StoreErrorEvent::new(code, message));
            }
            None => {}
        }
        Ok(())
    }

    async fn acknowledge(&self, transaction: &Transaction) -> Result<()> {
        let mut inner = self.lock();
        inner.acknowledge_calls += 1;
        if !inner.connected {
            return Err(StoreError::NotConnected);
        }
        if let Some(message) = inner.acknowledge_failure.clone() {
            return Err(StoreError::Acknowledge(message));
        }

        let stored = inner
            .transactions
            .get_mut(&transaction.id())
            .ok_or_else(|| StoreError::Acknowledge("unknown transaction".into()))?;

        if stored.transaction.needs_platform_acknowledge() {
            stored.platform_acks += 1;
        }
        tracing::trace!(transaction_id = %transaction.id(), "memory store finished transaction");
        stored.transaction.acknowledged = true;
        stored.finished = true;
        Ok(())
    }

    async fn available_purchases(&self) -> Result<Vec<Transaction>> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(StoreError::NotConnected);
        }
        if inner.query_failures > 0 {
            inner.query_failures -= 1;
            return Err(StoreError::Query("purchase history unavailable".into()));
        }

        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.transactions.get(id))
            .filter(|t| !t.finished)
            .map(|t| t.transaction.clone())
            .collect())
    }

    fn on_purchase_updated(&self, sink: EventSink) -> ListenerHandle {
        self.register(EventStream::PurchaseUpdated, sink)
    }

    fn on_purchase_error(&self, sink: EventSink) -> ListenerHandle {
        self.register(EventStream::PurchaseError, sink)
    }

    async fn disconnect(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.disconnect_calls += 1;
        tracing::debug!("memory store disconnected");
    }
}
