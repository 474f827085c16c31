//! Catalog cache with single-flight refresh.
//!
//! A refresh is one `fetch_products` call. Callers that arrive while a
//! refresh is running wait for it and share its result instead of issuing
//! their own. An empty fetch marks the cache stale but keeps the previous
//! entries for display.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use modli_iap_core::{Product, ProductId};
use modli_iap_store::StoreGateway;

use crate::config::CatalogConfig;

/// Products for a request, plus whether they may be out of date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Cached products for the requested ids, in request order.
    pub products: Vec<Product>,
    /// The last refresh came back empty. Retry later.
    pub stale: bool,
}

/// Client-local cache of store products.
#[derive(Debug)]
pub struct CatalogCache {
    config: CatalogConfig,
    state: Mutex<CatalogState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    fetched_at: Option<Instant>,
    stale: bool,
    /// Bumped after every completed refresh.
    generation: u64,
}

impl CatalogState {
    fn is_fresh_for(&self, ids: &[ProductId], max_age: std::time::Duration) -> bool {
        let young = self
            .fetched_at
            .map(|at| at.elapsed() < max_age)
            .unwrap_or(false);
        young && !self.stale && ids.iter().all(|id| self.products.contains_key(id))
    }

    fn snapshot(&self, ids: &[ProductId]) -> CatalogSnapshot {
        CatalogSnapshot {
            products: ids
                .iter()
                .filter_map(|id| self.products.get(id).cloned())
                .collect(),
            stale: self.stale,
        }
    }
}

impl CatalogCache {
    /// Create an empty cache.
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CatalogState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return cached products if fresh and covering `ids`, else refresh once.
    pub async fn fetch_or_refresh<G>(&self, gateway: &G, ids: &[ProductId]) -> CatalogSnapshot
    where
        G: StoreGateway + ?Sized,
    {
        let seen_generation = {
            let state = self.lock();
            if state.is_fresh_for(ids, self.config.max_age) {
                return state.snapshot(ids);
            }
            state.generation
        };

        let _refresh = self.refresh_gate.lock().await;

        {
            let state = self.lock();
            if state.generation != seen_generation {
                // Someone else refreshed while we queued. Share that result.
                return state.snapshot(ids);
            }
        }

        tracing::debug!(requested = ids.len(), "refreshing catalog");
        let fetched = gateway.fetch_products(ids).await;

        let mut state = self.lock();
        state.generation += 1;

        if fetched.is_empty() {
            state.stale = true;
            tracing::warn!(
                requested = ids.len(),
                cached = state.products.len(),
                "store returned no products; catalog marked stale"
            );
            return state.snapshot(ids);
        }

        let missing: Vec<&ProductId> = ids
            .iter()
            .filter(|id| !fetched.iter().any(|p| &p.product_id == *id))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "store did not return every requested product");
        }

        for product in fetched {
            state.products.insert(product.product_id.clone(), product);
        }
        state.stale = false;
        state.fetched_at = Some(Instant::now());
        tracing::debug!(cached = state.products.len(), "catalog refreshed");

        state.snapshot(ids)
    }

    /// Cached products for `ids`, without touching the store.
    pub fn snapshot(&self, ids: &[ProductId]) -> CatalogSnapshot {
        self.lock().snapshot(ids)
    }

    /// Whether a purchase of `product_id` may be sent to the store.
    ///
    /// Requires the product in the cache and the last refresh non-empty.
    pub fn is_purchasable(&self, product_id: &ProductId) -> bool {
        let state = self.lock();
        !state.stale && state.products.contains_key(product_id)
    }

    /// Whether the last refresh came back empty.
    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    /// Force the next `fetch_or_refresh` to hit the store.
    pub fn invalidate(&self) {
        self.lock().fetched_at = None;
    }
}
