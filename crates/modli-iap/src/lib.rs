//! # Modli IAP
//!
//! In-app credit purchases for Modli, mediated by the platform store.
//!
//! ## Overview
//!
//! A user picks a credit package (a [`Plan`]); the platform store collects
//! payment; once the store reports the transaction, it is acknowledged
//! with the store and the plan's credits are granted to the signed-in
//! account. Every store-reported transaction is credited at most once, and
//! purchases the store completed while the app was away are recovered on
//! the next `initialize` or `resume`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modli_iap::{Purchases, PurchasesConfig, PlanId, PurchaseOutcome};
//! use modli_iap::entitlement::{AuthenticatedApplier, CreditLedger, StaticSession};
//! use modli_iap::store::MemoryStore;
//!
//! async fn example() {
//!     modli_iap::telemetry::init();
//!
//!     let applier = AuthenticatedApplier::new(
//!         StaticSession::signed_in("bearer-token"),
//!         CreditLedger::new(),
//!     );
//!     let purchases = Purchases::new(MemoryStore::new(), applier, PurchasesConfig::default());
//!
//!     purchases.initialize().await.unwrap();
//!     let listing = purchases.list_products().await.unwrap();
//!     if listing.stale {
//!         // offer a reload
//!     }
//!
//!     match purchases.purchase(&PlanId::new("standard")).await.unwrap() {
//!         PurchaseOutcome::Succeeded { credits, .. } => println!("+{credits} credits"),
//!         PurchaseOutcome::Cancelled | PurchaseOutcome::Busy => {}
//!         PurchaseOutcome::Failed(reason) => eprintln!("purchase failed: {}", reason.kind()),
//!     }
//!
//!     purchases.dispose().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `modli_iap::core` - Plans, products, transactions, outcomes
//! - `modli_iap::store` - Store gateway trait and in-memory store
//! - `modli_iap::entitlement` - Credit granting
//! - `modli_iap::purchase` - Coordinator, catalog, listener

pub mod config;
pub mod error;
pub mod purchases;
pub mod telemetry;

// Re-export component crates
pub use modli_iap_core as core;
pub use modli_iap_entitlement as entitlement;
pub use modli_iap_purchase as purchase;
pub use modli_iap_store as store;

// Re-export main types for convenience
pub use config::PurchasesConfig;
pub use error::{PurchasesError, Result};
pub use purchases::{PlanOffer, ProductListing, Purchases};

pub use modli_iap_core::{
    Currency, FailureReason, Plan, PlanId, PlanTable, Product, ProductId, PurchaseOutcome,
    Transaction, TransactionId,
};
pub use modli_iap_purchase::{Availability, Phase, RecoveryReport};
