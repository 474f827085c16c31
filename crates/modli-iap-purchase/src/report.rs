//! Recovery report.

use serde::{Deserialize, Serialize};

/// Result of one recovery pass over the store's unfinished purchases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Transactions the store listed.
    pub found: usize,
    /// Acknowledged and credited by this pass.
    pub settled: usize,
    /// Already settled, already acknowledged, or payment still pending.
    pub skipped: usize,
    /// No plan claims the product. Left unacknowledged.
    pub unknown: usize,
    /// Acknowledge or grant failed.
    pub failed: usize,
}

impl RecoveryReport {
    /// True if nothing failed and nothing was unrecognized.
    pub fn is_clean(&self) -> bool {
        self.unknown == 0 && self.failed == 0
    }
}
