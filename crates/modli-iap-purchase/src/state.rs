//! Coordinator phases and initialization result.

use serde::{Deserialize, Serialize};

/// Phase of the purchase state machine.
///
/// ```text
/// Idle -> Initializing -> Ready <-> Requesting -> AwaitingEvent
///                      \-> Unavailable           |
///                 Ready <- Crediting <- Acknowledging
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Not yet initialized.
    Idle,
    /// Connecting to the store.
    Initializing,
    /// Connected, no attempt in flight.
    Ready,
    /// The store could not be reached. `initialize` may be retried.
    Unavailable,
    /// A purchase request is being handed to the store.
    Requesting,
    /// The store accepted a request; waiting for its event.
    AwaitingEvent,
    /// Acknowledging a transaction with the store.
    Acknowledging,
    /// Granting credits for an acknowledged transaction.
    Crediting,
    /// Torn down. Terminal.
    Disposed,
}

impl Phase {
    /// Whether something is in flight, so a new purchase must be refused.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Phase::Requesting | Phase::AwaitingEvent | Phase::Acknowledging | Phase::Crediting
        )
    }
}

/// Result of `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// Purchasing is enabled.
    Ready,
    /// The store is unreachable. Purchasing is disabled until a retry succeeds.
    Unavailable,
}
