//! Plans: the static credit packages offered to the user.
//!
//! The plan table is configuration, loaded once at startup and validated so
//! that both plan ids and product ids are unique. Event matching relies on
//! the product id uniqueness: a store event names a product, and exactly one
//! plan may claim it.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::product::Product;
use crate::types::{PlanId, ProductId};

/// A user-facing credit package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Store SKU backing this plan.
    #[serde(rename = "productId", alias = "product_id")]
    pub product_id: ProductId,
    /// Credits granted per purchase.
    pub credits: u32,
    /// Static fallback price in USD.
    pub price_usd: f64,
    /// Static fallback price in Turkish lira.
    pub price_try: f64,
}

/// Currency used for the static fallback price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Usd,
    Try,
}

impl Plan {
    /// Create a plan.
    pub fn new(
        id: impl Into<String>,
        product_id: impl Into<String>,
        credits: u32,
        price_usd: f64,
        price_try: f64,
    ) -> Self {
        Self {
            id: PlanId::new(id),
            product_id: ProductId::new(product_id),
            credits,
            price_usd,
            price_try,
        }
    }

    /// Price to show for this plan.
    ///
    /// The store's localized price wins when the catalog has the product;
    /// otherwise the static price in the requested currency is formatted.
    pub fn display_price(&self, product: Option<&Product>, currency: Currency) -> String {
        match product {
            Some(p) if p.product_id == self.product_id && !p.localized_price.is_empty() => {
                p.localized_price.clone()
            }
            _ => match currency {
                Currency::Usd => format!("${:.2}", self.price_usd),
                Currency::Try => format!("{:.2} TL", self.price_try),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CoreError::InvalidPlan {
            plan_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.as_str().trim().is_empty() {
            return Err(invalid("empty plan id"));
        }
        if self.product_id.as_str().trim().is_empty() {
            return Err(invalid("empty product id"));
        }
        if self.credits == 0 {
            return Err(invalid("credits must be positive"));
        }
        if !(self.price_usd.is_finite() && self.price_usd >= 0.0)
            || !(self.price_try.is_finite() && self.price_try >= 0.0)
        {
            return Err(invalid("prices must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Validated, immutable plan table.
#[derive(Debug, Clone)]
pub struct PlanTable {
    plans: Vec<Plan>,
    by_id: HashMap<PlanId, usize>,
    by_product: HashMap<ProductId, usize>,
}

impl PlanTable {
    /// Build and validate a plan table.
    ///
    /// Rejects an empty table, invalid plans, and duplicate plan or product
    /// ids. Plan order is preserved for display.
    pub fn new(plans: Vec<Plan>) -> Result<Self> {
        if plans.is_empty() {
            return Err(CoreError::EmptyPlanTable);
        }

        let mut by_id = HashMap::with_capacity(plans.len());
        let mut by_product: HashMap<ProductId, usize> = HashMap::with_capacity(plans.len());

        for (index, plan) in plans.iter().enumerate() {
            plan.validate()?;

            if by_id.insert(plan.id.clone(), index).is_some() {
                return Err(CoreError::DuplicatePlanId(plan.id.clone()));
            }
            if let Some(&first) = by_product.get(&plan.product_id) {
                return Err(CoreError::DuplicateProductId {
                    product_id: plan.product_id.clone(),
                    first: plans[first].id.clone(),
                    second: plan.id.clone(),
                });
            }
            by_product.insert(plan.product_id.clone(), index);
        }

        Ok(Self {
            plans,
            by_id,
            by_product,
        })
    }

    /// Parse a JSON array of plans.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let plans: Vec<Plan> = serde_json::from_str(json)?;
        Self::new(plans)
    }

    /// Load a JSON plan file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// The shipped plan table.
    pub fn builtin() -> Self {
        let plans = vec![
            Plan::new("basic", "modli_basic", 20, 4.99, 149.99),
            Plan::new("standard", "modli_standard", 50, 9.99, 299.99),
            // 100 credits plus 10 bonus
            Plan::new("premium", "modli_premium", 110, 19.99, 599.99),
        ];
        match Self::new(plans) {
            Ok(table) => table,
            Err(e) => unreachable!("builtin plan table is invalid: {e}"),
        }
    }

    /// Look up a plan by id.
    pub fn get(&self, id: &PlanId) -> Option<&Plan> {
        self.by_id.get(id).map(|&i| &self.plans[i])
    }

    /// Look up the plan that owns a product id.
    pub fn by_product(&self, product_id: &ProductId) -> Option<&Plan> {
        self.by_product.get(product_id).map(|&i| &self.plans[i])
    }

    /// All product ids, in plan order.
    pub fn product_ids(&self) -> Vec<ProductId> {
        self.plans.iter().map(|p| p.product_id.clone()).collect()
    }

    /// Iterate over plans in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter()
    }

    /// Number of plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Always false for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self::builtin()
    }
}
