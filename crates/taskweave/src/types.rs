//! Common types and configuration for the taskweave executor

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::limits::Limit;

/// How a run over an empty task list delivers the initial value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyDelivery {
    /// Invoke the callback synchronously, inside the call that started the run
    #[default]
    Immediate,
    /// Invoke the callback in the next scheduler turn, like every other path
    Deferred,
}

/// Configuration for the taskweave executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrency used by `parallel` and `race` when no limit is given
    pub default_limit: Limit,

    /// Delivery mode for runs over an empty task list
    pub empty_delivery: EmptyDelivery,

    /// Delay before each deferred task start
    pub start_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_limit: Limit::None,
            empty_delivery: EmptyDelivery::Immediate,
            start_delay: Duration::ZERO,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency used when a factory is not given a limit
    pub fn with_default_limit(mut self, max_in_flight: usize) -> ConfigResult<Self> {
        if max_in_flight == 0 {
            return Err(ConfigError::invalid_throttle("executor", max_in_flight));
        }
        self.default_limit = Limit::from(max_in_flight);
        Ok(self)
    }

    /// Remove the default concurrency limit
    pub fn with_unlimited_concurrency(mut self) -> Self {
        self.default_limit = Limit::None;
        self
    }

    /// Set the delivery mode for empty task lists
    pub fn with_empty_delivery(mut self, empty_delivery: EmptyDelivery) -> Self {
        self.empty_delivery = empty_delivery;
        self
    }

    /// Set the delay before each deferred task start
    pub fn with_start_delay(mut self, start_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self
    }

    /// Create a configuration where every delivery is asynchronous
    pub fn for_testing() -> Self {
        Self {
            default_limit: Limit::None,
            empty_delivery: EmptyDelivery::Deferred,
            start_delay: Duration::ZERO,
        }
    }
}

/// Counters describing a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total number of tasks in the run
    pub total: usize,
    /// Number of tasks that were started
    pub started: usize,
    /// Number of tasks that reported success
    pub successes: usize,
    /// Number of tasks that reported failure
    pub failures: usize,
    /// Number of in-flight tasks cancelled when the run finished
    pub cancelled: usize,
}

impl RunSummary {
    /// Number of tasks that never got started
    pub fn unstarted(&self) -> usize {
        self.total.saturating_sub(self.started)
    }
}
