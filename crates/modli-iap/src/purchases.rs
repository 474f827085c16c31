//! Purchases: the public entry point.
//!
//! Wraps a [`PurchaseCoordinator`] with the configured plan table and
//! exposes the four operations the UI needs: initialize, list products,
//! purchase, dispose. `resume` is called by the host on app foreground.

use serde::Serialize;
use tokio::sync::broadcast;

use modli_iap_core::{Currency, Plan, PlanId, PlanTable, Product, PurchaseOutcome};
use modli_iap_entitlement::EntitlementApplier;
use modli_iap_purchase::{Availability, Phase, PurchaseCoordinator, RecoveryReport};
use modli_iap_store::StoreGateway;

use crate::config::PurchasesConfig;
use crate::error::Result;

/// A plan as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOffer {
    pub plan: Plan,
    /// Store catalog entry, if loaded.
    pub product: Option<Product>,
    /// Localized store price, or the plan's static fallback price.
    pub display_price: String,
}

/// Result of `list_products`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductListing {
    /// Products the store returned for the plan table.
    pub products: Vec<Product>,
    /// The last catalog refresh came back empty; offer a reload.
    pub stale: bool,
    /// Every plan in configured order, priced for display.
    pub offers: Vec<PlanOffer>,
}

impl ProductListing {
    fn build(plans: &PlanTable, products: Vec<Product>, stale: bool, currency: Currency) -> Self {
        let offers = plans
            .iter()
            .map(|plan| {
                let product = products
                    .iter()
                    .find(|p| p.product_id == plan.product_id)
                    .cloned();
                PlanOffer {
                    display_price: plan.display_price(product.as_ref(), currency),
                    plan: plan.clone(),
                    product,
                }
            })
            .collect();
        Self {
            products,
            stale,
            offers,
        }
    }
}

/// Store-mediated credit purchases.
pub struct Purchases<G, A> {
    coordinator: PurchaseCoordinator<G, A>,
    config: PurchasesConfig,
}

impl<G, A> Purchases<G, A>
where
    G: StoreGateway + 'static,
    A: EntitlementApplier + 'static,
{
    /// Create the facade. Nothing touches the store until first use.
    pub fn new(gateway: G, applier: A, config: PurchasesConfig) -> Self {
        let coordinator = PurchaseCoordinator::new(
            gateway,
            applier,
            config.plans.clone(),
            config.coordinator.clone(),
            config.catalog.clone(),
        );
        Self {
            coordinator,
            config,
        }
    }

    /// Configured plans.
    pub fn plans(&self) -> &PlanTable {
        &self.config.plans
    }

    /// Configuration in use.
    pub fn config(&self) -> &PurchasesConfig {
        &self.config
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &PurchaseCoordinator<G, A> {
        &self.coordinator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect to the store. `Unavailable` disables purchasing; call again
    /// to retry.
    pub async fn initialize(&self) -> Result<Availability> {
        Ok(self.coordinator.initialize().await?)
    }

    /// Replay purchases the store completed while the app was away.
    pub async fn resume(&self) -> Result<RecoveryReport> {
        Ok(self.coordinator.resume().await?)
    }

    /// Tear down. Further calls fail with a disposed error.
    pub async fn dispose(&self) {
        self.coordinator.dispose().await
    }

    /// Current coordinator phase.
    pub async fn phase(&self) -> Phase {
        self.coordinator.phase().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalog & purchase
    // ─────────────────────────────────────────────────────────────────────────

    /// Products and display prices for every plan.
    pub async fn list_products(&self) -> Result<ProductListing> {
        let snapshot = self.coordinator.list_products().await?;
        Ok(ProductListing::build(
            &self.config.plans,
            snapshot.products,
            snapshot.stale,
            self.config.fallback_currency,
        ))
    }

    /// Buy a plan. Resolves when the store reports the result.
    pub async fn purchase(&self, plan_id: &PlanId) -> Result<PurchaseOutcome> {
        let outcome = self.coordinator.purchase(plan_id).await?;
        if let Some(reason) = outcome.failure() {
            tracing::debug!(%plan_id, kind = reason.kind(), "purchase failed");
        }
        Ok(outcome)
    }

    /// Every terminal outcome, including credits from recovery or redelivery.
    pub fn outcomes(&self) -> broadcast::Receiver<PurchaseOutcome> {
        self.coordinator.subscribe_outcomes()
    }
}

impl<G, A> std::fmt::Debug for Purchases<G, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Purchases")
            .field("plans", &self.config.plans.len())
            .field("fallback_currency", &self.config.fallback_currency)
            .finish_non_exhaustive()
    }
}
