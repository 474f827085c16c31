//! # Modli IAP Testkit
//!
//! Testing utilities for Modli IAP.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A catalog matching a plan table, transaction builders, a
//!   [`RecordingApplier`](fixtures::RecordingApplier) that counts grant calls,
//!   and a [`Harness`](fixtures::Harness) wiring a `MemoryStore` to a
//!   coordinator
//! - **Generators**: Proptest strategies for plan tables, transactions and
//!   store error codes
//! - **Golden vectors**: Expected error-code classification and transaction
//!   identities
//!
//! ## Harness
//!
//! ```rust,no_run
//! use modli_iap_core::{PlanId, PurchaseOutcome};
//! use modli_iap_testkit::fixtures::Harness;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let harness = Harness::start().await?;
//!     let (outcome, _transaction) = harness.buy(&PlanId::new("standard")).await?;
//!     assert!(matches!(outcome, PurchaseOutcome::Succeeded { credits: 50, .. }));
//!     assert_eq!(harness.applier.grant_count(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use modli_iap_testkit::generators::plan_table;
//!
//! proptest! {
//!     #[test]
//!     fn product_ids_unique(table in plan_table(8)) {
//!         let ids = table.product_ids();
//!         let unique: std::collections::HashSet<_> = ids.iter().collect();
//!         prop_assert_eq!(unique.len(), ids.len());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;
