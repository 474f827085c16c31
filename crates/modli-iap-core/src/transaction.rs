//! Transaction: one store-reported purchase instance.

use serde::{Deserialize, Serialize};

use crate::types::{ProductId, TransactionId};

/// Platform whose store reported the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Google Play Billing.
    Android,
    /// App Store / StoreKit.
    Ios,
}

impl Platform {
    /// Stable tag used in identity derivation.
    pub const fn tag(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

/// Store-reported purchase state.
///
/// Only Google Play reports anything other than `Purchased`; iOS
/// transactions delivered to the client are always purchased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Payment completed.
    Purchased,
    /// Deferred payment (cash, slow card). Must not be credited yet.
    Pending,
    /// Store did not report a state.
    Unspecified,
}

/// A store-reported purchase.
///
/// Identity comes from `token` (Android purchase token or iOS receipt /
/// transaction identifier). The client never invents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Product that was bought.
    pub product_id: ProductId,

    /// Reporting platform.
    pub platform: Platform,

    /// Store-assigned receipt or purchase token.
    pub token: String,

    /// Whether the store already considers this transaction acknowledged.
    pub acknowledged: bool,

    /// Platform purchase state.
    pub state: PurchaseState,

    /// Purchase time reported by the store (Unix ms), if any.
    pub purchase_time_ms: Option<i64>,
}

impl Transaction {
    /// Create a purchased, unacknowledged transaction.
    pub fn new(platform: Platform, product_id: ProductId, token: impl Into<String>) -> Self {
        Self {
            product_id,
            platform,
            token: token.into(),
            acknowledged: false,
            state: PurchaseState::Purchased,
            purchase_time_ms: None,
        }
    }

    /// Set the purchase state.
    pub fn with_state(mut self, state: PurchaseState) -> Self {
        self.state = state;
        self
    }

    /// Set the acknowledged flag.
    pub fn with_acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = acknowledged;
        self
    }

    /// Set the purchase time.
    pub fn with_purchase_time(mut self, ms: i64) -> Self {
        self.purchase_time_ms = Some(ms);
        self
    }

    /// Content-derived identity of this transaction.
    pub fn id(&self) -> TransactionId {
        TransactionId::derive(self.platform, &self.token)
    }

    /// Whether payment is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.state == PurchaseState::Pending
    }

    /// Whether acknowledging requires the explicit Play acknowledge call in
    /// addition to finishing the transaction.
    pub fn needs_platform_acknowledge(&self) -> bool {
        self.platform == Platform::Android
            && self.state == PurchaseState::Purchased
            && !self.acknowledged
    }
}
