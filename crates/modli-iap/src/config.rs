//! Facade configuration.

use std::path::Path;

use modli_iap_core::{Currency, PlanTable};
use modli_iap_purchase::{CatalogConfig, CoordinatorConfig};

use crate::error::Result;

/// Configuration for [`Purchases`](crate::Purchases).
#[derive(Debug, Clone)]
pub struct PurchasesConfig {
    /// Credit packages on offer.
    pub plans: PlanTable,
    /// Catalog freshness.
    pub catalog: CatalogConfig,
    /// Coordinator behavior.
    pub coordinator: CoordinatorConfig,
    /// Currency for the static fallback price when the store has none.
    pub fallback_currency: Currency,
}

impl Default for PurchasesConfig {
    fn default() -> Self {
        Self {
            plans: PlanTable::builtin(),
            catalog: CatalogConfig::default(),
            coordinator: CoordinatorConfig::default(),
            fallback_currency: Currency::Usd,
        }
    }
}

impl PurchasesConfig {
    /// Default configuration with plans loaded from a JSON file.
    pub fn from_plan_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::default().with_plans(PlanTable::from_path(path)?))
    }

    pub fn with_plans(mut self, plans: PlanTable) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_catalog(mut self, catalog: CatalogConfig) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_fallback_currency(mut self, currency: Currency) -> Self {
        self.fallback_currency = currency;
        self
    }
}
