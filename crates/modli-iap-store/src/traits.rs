//! StoreGateway trait: the abstract interface over the platform store.
//!
//! The gateway hides Google Play Billing / StoreKit behind a small async
//! surface. Purchase results never come back from `request_purchase`; they
//! arrive on the event streams registered with `on_purchase_updated` and
//! `on_purchase_error`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use modli_iap_core::{Product, ProductId, StoreEvent, Transaction};

use crate::error::Result;

/// Channel end the gateway pushes events into.
///
/// Both streams of a listener pair share one sink, which keeps the relative
/// order of updates and errors as the store produced them.
pub type EventSink = mpsc::UnboundedSender<StoreEvent>;

/// Which store event stream a handle is registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStream {
    PurchaseUpdated,
    PurchaseError,
}

/// An owned registration on one store event stream.
///
/// Dropping the handle removes the registration. There is no way to leak a
/// registration other than leaking the handle itself.
pub struct ListenerHandle {
    stream: EventStream,
    remover: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    /// Wrap a removal callback.
    pub fn new(stream: EventStream, remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            stream,
            remover: Some(Box::new(remove)),
        }
    }

    /// The stream this handle is registered on.
    pub fn stream(&self) -> EventStream {
        self.stream
    }

    /// Remove the registration now.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(remove) = self.remover.take() {
            remove();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("stream", &self.stream)
            .field("active", &self.remover.is_some())
            .finish()
    }
}

/// Async interface over a platform commerce store.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Open the billing connection.
    ///
    /// Returns `Unavailable` when the store cannot be reached. Callers
    /// degrade by disabling purchasing.
    async fn connect(&self) -> Result<()>;

    /// Fetch catalog entries for the given ids.
    ///
    /// Never fails: any error yields an empty list, which callers treat as
    /// "stale, retryable".
    async fn fetch_products(&self, ids: &[ProductId]) -> Vec<Product>;

    /// Start a purchase flow.
    ///
    /// `Ok` means only that the store accepted the request. The result is
    /// delivered later on the event streams.
    async fn request_purchase(&self, product_id: &ProductId) -> Result<()>;

    /// Mark a transaction consumed (acknowledge and finish).
    ///
    /// Idempotent: a second call on the same transaction has the same
    /// observable effect as the first.
    async fn acknowledge(&self, transaction: &Transaction) -> Result<()>;

    /// Purchases the store considers complete but the client has not finished.
    async fn available_purchases(&self) -> Result<Vec<Transaction>>;

    /// Register a sink for purchase-update events.
    fn on_purchase_updated(&self, sink: EventSink) -> ListenerHandle;

    /// Register a sink for purchase-error events.
    fn on_purchase_error(&self, sink: EventSink) -> ListenerHandle;

    /// Close the billing connection.
    async fn disconnect(&self);
}

#[async_trait]
impl<G: StoreGateway + ?Sized> StoreGateway for Arc<G> {
    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn fetch_products(&self, ids: &[ProductId]) -> Vec<Product> {
        (**self).fetch_products(ids).await
    }

    async fn request_purchase(&self, product_id: &ProductId) -> Result<()> {
        (**self).request_purchase(product_id).await
    }

    async fn acknowledge(&self, transaction: &Transaction) -> Result<()> {
        (**self).acknowledge(transaction).await
    }

    async fn available_purchases(&self) -> Result<Vec<Transaction>> {
        (**self).available_purchases().await
    }

    fn on_purchase_updated(&self, sink: EventSink) -> ListenerHandle {
        (**self).on_purchase_updated(sink)
    }

    fn on_purchase_error(&self, sink: EventSink) -> ListenerHandle {
        (**self).on_purchase_error(sink)
    }

    async fn disconnect(&self) {
        (**self).disconnect().await
    }
}
