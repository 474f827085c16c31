//! # Modli IAP Entitlement
//!
//! Turning a settled store transaction into account credits.
//!
//! ## Key Types
//!
//! - [`EntitlementApplier`] - The interface the purchase coordinator calls
//! - [`CreditGrant`] / [`GrantReceipt`] - Request and result of one grant
//! - [`AuthenticatedApplier`] - Session lookup plus backend credit call
//! - [`CreditLedger`] - In-memory, transaction-idempotent credit backend
//!
//! ## Idempotency
//!
//! Every grant carries the transaction id. Backends credit a transaction
//! at most once; a replay returns a receipt with `replayed = true`.

pub mod applier;
pub mod error;
pub mod grant;
pub mod ledger;
pub mod session;

pub use applier::{AuthenticatedApplier, EntitlementApplier};
pub use error::{EntitlementError, Result};
pub use grant::{CreditGrant, GrantReceipt};
pub use ledger::{CreditBackend, CreditLedger, LedgerEntry};
pub use session::{AuthSession, BearerToken, StaticSession};
