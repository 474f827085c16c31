//! Coordinator and catalog configuration.

use std::time::Duration;

use modli_iap_core::RetryPolicy;

/// Catalog cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// How long a successful fetch stays fresh.
    pub max_age: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(15 * 60),
        }
    }
}

impl CatalogConfig {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Purchase coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Retry policy for recovery queries against the store.
    pub retry: RetryPolicy,
    /// Replay unfinished transactions right after a successful initialize.
    pub recover_on_initialize: bool,
    /// Capacity of the outcome broadcast channel.
    pub outcome_buffer: usize,
    /// How many settled transaction ids to remember for redelivery checks.
    pub settled_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            recover_on_initialize: true,
            outcome_buffer: 16,
            settled_capacity: 1024,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_recover_on_initialize(mut self, recover: bool) -> Self {
        self.recover_on_initialize = recover;
        self
    }

    pub fn with_outcome_buffer(mut self, capacity: usize) -> Self {
        self.outcome_buffer = capacity;
        self
    }

    pub fn with_settled_capacity(mut self, capacity: usize) -> Self {
        self.settled_capacity = capacity;
        self
    }
}
