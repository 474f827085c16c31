//! # Modli IAP Store
//!
//! Gateway abstraction over the platform commerce store (Google Play Billing
//! on Android, StoreKit on iOS).
//!
//! ## Design
//!
//! - Results of a purchase request are never returned by the request itself.
//!   They arrive later as [`StoreEvent`](modli_iap_core::StoreEvent)s on the
//!   sinks registered through [`StoreGateway::on_purchase_updated`] and
//!   [`StoreGateway::on_purchase_error`].
//! - Registrations are owned [`ListenerHandle`]s. Dropping one unregisters it.
//! - `acknowledge` is idempotent, so redelivered transactions are safe.
//!
//! [`MemoryStore`] is an in-process store with scriptable failures, used by
//! tests and by hosts that run without a billing service.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{AutoResponse, MemoryStore};
pub use traits::{EventSink, EventStream, ListenerHandle, StoreGateway};
