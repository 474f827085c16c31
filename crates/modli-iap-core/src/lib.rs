//! # Modli IAP Core
//!
//! Pure primitives for Modli in-app purchases: plans, products, transactions,
//! store events and purchase outcomes.
//!
//! This crate does no store or network I/O. The only async code is the
//! bounded retry executor in [`retry`], which needs a timer.
//!
//! ## Key Types
//!
//! - [`Plan`] / [`PlanTable`] - Static credit packages, validated on load
//! - [`Product`] - Live store catalog entry for a plan's product id
//! - [`Transaction`] - A store-reported purchase, identified by [`TransactionId`]
//! - [`StoreEvent`] - What the store delivers asynchronously after a request
//! - [`PurchaseOutcome`] - Terminal result of a purchase attempt
//!
//! ## Identity
//!
//! A [`TransactionId`] is derived from the store-assigned token, never
//! generated by the client. The same physical purchase always maps to the same
//! id, which is what makes acknowledgment and crediting idempotent.

pub mod error;
pub mod event;
pub mod outcome;
pub mod plan;
pub mod product;
pub mod retry;
pub mod transaction;
pub mod types;

pub use error::{CoreError, Result};
pub use event::{codes, ErrorClass, StoreErrorEvent, StoreEvent};
pub use outcome::{FailureReason, PurchaseOutcome};
pub use plan::{Currency, Plan, PlanTable};
pub use product::Product;
pub use retry::{retry, RetryPolicy};
pub use transaction::{Platform, PurchaseState, Transaction};
pub use types::{PlanId, ProductId, TransactionId};
