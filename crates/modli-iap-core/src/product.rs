//! Product: a live store catalog entry.

use serde::{Deserialize, Serialize};

use crate::types::ProductId;

/// Store-reported catalog entry. Prices are kept as the store formats them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Store SKU.
    pub product_id: ProductId,
    /// Price formatted for the user's storefront, e.g. `"₺299,99"`.
    pub localized_price: String,
    /// Raw price string, e.g. `"9.99"`.
    pub price: String,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl Product {
    /// Create a product entry.
    pub fn new(
        product_id: ProductId,
        localized_price: impl Into<String>,
        price: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            localized_price: localized_price.into(),
            price: price.into(),
            currency: currency.into(),
        }
    }
}
