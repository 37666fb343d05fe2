//! Broker configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default input queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of the bounded input queue shared by all producers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Set the input queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Queue capacity usable by a tokio channel (at least 1).
    #[must_use]
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            warn!("queue_capacity of 0 is not allowed, using 1");
            1
        } else {
            self.queue_capacity
        }
    }
}
