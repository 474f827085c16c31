//! # Modli IAP Purchase
//!
//! The purchase lifecycle: catalog, store event subscription, and the
//! coordinator state machine that turns store transactions into credits.
//!
//! ## Key Types
//!
//! - [`PurchaseCoordinator`] - One attempt at a time; settles every reported
//!   transaction at most once
//! - [`CatalogCache`] - Single-flight product cache with a staleness flag
//! - [`TransactionListener`] - The one live purchase-update/error subscription
//! - [`RecoveryReport`] - What a `resume` pass found and did
//!
//! ## Attempt Flow
//!
//! ```text
//! purchase(plan)
//!   |-- plan unknown ----------------------------> Failed(UnknownPlan)
//!   |-- product not in catalog ------------------> Failed(ProductsNotLoaded)
//!   |-- request_purchase rejected ---------------> Failed(RequestError) / Cancelled
//!   '-- accepted -> AwaitingEvent
//!         |-- error event ----------------------> Cancelled / Failed(Transient|Fatal)
//!         |-- update, no plan -------------------> Failed(UnknownProduct), not acknowledged
//!         |-- update already acknowledged -------> Failed(Fatal), not credited
//!         '-- update -> Acknowledging
//!               |-- ack fails ------------------> Failed(VerificationFailed)
//!               '-- Crediting
//!                     |-- grant fails ----------> Failed(CreditGrantFailed)
//!                     '-- granted --------------> Succeeded(plan, credits)
//! ```
//!
//! Failures before acknowledgment are safe to retry; the store redelivers
//! the transaction. A grant failure after acknowledgment is never retried
//! and is logged at error level for reconciliation.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod report;
pub mod state;

pub use catalog::{CatalogCache, CatalogSnapshot};
pub use config::{CatalogConfig, CoordinatorConfig};
pub use coordinator::PurchaseCoordinator;
pub use error::{CoordinatorError, Result};
pub use listener::{EventHandler, TransactionListener};
pub use report::RecoveryReport;
pub use state::{Availability, Phase};
