//! TransactionListener: the one live subscription pair.
//!
//! Both store streams feed a single channel, drained by one pump task that
//! hands events to an [`EventHandler`] strictly one at a time. The pair and
//! its pump are a single owned value, so there is never more than one.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use modli_iap_core::StoreEvent;
use modli_iap_store::{ListenerHandle, StoreGateway};

/// Receiver of store events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: StoreEvent);
}

struct Subscription {
    updates: ListenerHandle,
    errors: ListenerHandle,
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl Subscription {
    /// Remove both registrations and tell the pump to stop after the event it
    /// is handling, if any.
    fn release(self) -> JoinHandle<()> {
        self.updates.remove();
        self.errors.remove();
        let _ = self.stop.send(());
        self.pump
    }
}

/// Owner of the active purchase-update / purchase-error subscription.
#[derive(Default)]
pub struct TransactionListener {
    active: Option<Subscription>,
    subscriptions: u64,
}

impl TransactionListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to the gateway's event streams.
    ///
    /// Any existing subscription is released first. The pump holds only a
    /// weak reference to the handler and exits once the handler is gone.
    pub fn subscribe<G, H>(&mut self, gateway: &G, handler: &Arc<H>)
    where
        G: StoreGateway + ?Sized,
        H: EventHandler,
    {
        if let Some(previous) = self.active.take() {
            tracing::debug!("replacing existing store subscription");
            // The old pump finishes its current event on its own.
            drop(previous.release());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let updates = gateway.on_purchase_updated(tx.clone());
        let errors = gateway.on_purchase_error(tx);
        let (stop, stopped) = oneshot::channel();
        let pump = tokio::spawn(pump(rx, stopped, Arc::downgrade(handler)));

        self.subscriptions += 1;
        self.active = Some(Subscription {
            updates,
            errors,
            stop,
            pump,
        });
        tracing::debug!(subscription = self.subscriptions, "subscribed to store events");
    }

    /// Release the subscription and wait for the pump to finish the event it
    /// is handling. Events still queued are dropped; the store redelivers
    /// anything left unacknowledged.
    pub async fn unsubscribe(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Err(e) = active.release().await {
            if e.is_panic() {
                tracing::error!(error = %e, "store event pump panicked");
            }
        }
        tracing::debug!("unsubscribed from store events");
    }

    /// Whether a subscription is live.
    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    /// Number of subscriptions made over this listener's lifetime.
    pub fn subscription_count(&self) -> u64 {
        self.subscriptions
    }
}

impl std::fmt::Debug for TransactionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionListener")
            .field("subscribed", &self.is_subscribed())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

async fn pump<H: EventHandler>(
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    mut stop: oneshot::Receiver<()>,
    handler: Weak<H>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(handler) = handler.upgrade() else {
            break;
        };
        handler.handle(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use modli_iap_core::{codes, Product, ProductId};
    use modli_iap_store::{EventStream, MemoryStore};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<StoreEvent>>,
        notify: tokio::sync::Notify,
    }

    impl Recorder {
        async fn wait_for(&self, count: usize) -> Vec<StoreEvent> {
            loop {
                let notified = self.notify.notified();
                {
                    let events = self.events.lock().unwrap();
                    if events.len() >= count {
                        return events.clone();
                    }
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: StoreEvent) {
            self.events.lock().unwrap().push(event);
            self.notify.notify_waiters();
        }
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new().with_products([Product::new(
            ProductId::new("a"),
            "$1.00",
            "1.00",
            "USD",
        )]);
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_delivers_in_store_order() {
        let store = store().await;
        let recorder = Arc::new(Recorder::default());
        let mut listener = TransactionListener::new();
        listener.subscribe(&store, &recorder);

        store.complete_purchase(&ProductId::new("a"));
        store.emit_error(codes::USER_CANCELLED, "backed out");

        let events = recorder.wait_for(2).await;
        assert!(matches!(events[0], StoreEvent::PurchaseUpdated(_)));
        assert!(matches!(events[1], StoreEvent::PurchaseFailed(_)));
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_single_pair() {
        let store = store().await;
        let recorder = Arc::new(Recorder::default());
        let mut listener = TransactionListener::new();

        listener.subscribe(&store, &recorder);
        listener.subscribe(&store, &recorder);
        listener.subscribe(&store, &recorder);

        assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 1);
        assert_eq!(store.listener_count(EventStream::PurchaseError), 1);
        assert_eq!(listener.subscription_count(), 3);

        store.complete_purchase(&ProductId::new("a"));
        let events = recorder.wait_for(1).await;
        tokio::task::yield_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_registrations() {
        let store = store().await;
        let recorder = Arc::new(Recorder::default());
        let mut listener = TransactionListener::new();

        listener.subscribe(&store, &recorder);
        listener.unsubscribe().await;

        assert!(!listener.is_subscribed());
        assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 0);
        assert_eq!(store.listener_count(EventStream::PurchaseError), 0);

        // Second call is a no-op.
        listener.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_dropping_listener_releases_registrations() {
        let store = store().await;
        let recorder = Arc::new(Recorder::default());
        {
            let mut listener = TransactionListener::new();
            listener.subscribe(&store, &recorder);
            assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 1);
        }
        assert_eq!(store.listener_count(EventStream::PurchaseUpdated), 0);
    }
}
