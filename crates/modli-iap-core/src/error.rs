//! Error types for Modli IAP Core.

use thiserror::Error;

use crate::types::{PlanId, ProductId};

/// Errors raised while loading or validating static plan configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("plan table is empty")]
    EmptyPlanTable,

    #[error("duplicate plan id: {0}")]
    DuplicatePlanId(PlanId),

    #[error("duplicate product id: {product_id} (plans {first} and {second})")]
    DuplicateProductId {
        product_id: ProductId,
        first: PlanId,
        second: PlanId,
    },

    #[error("invalid plan {plan_id}: {reason}")]
    InvalidPlan { plan_id: PlanId, reason: String },

    #[error("plan config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("plan config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
