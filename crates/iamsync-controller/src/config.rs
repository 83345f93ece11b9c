//! Controller runtime settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ControllerConfig {
    /// Requeue delay after a converged pass.
    pub resync_interval_ms: u64,
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_ms: u64,
    /// Reconciles allowed to run concurrently.
    pub workers: usize,
    /// Deadline for one reconcile invocation.
    pub reconcile_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: 60_000,
            error_backoff_base_ms: 500,
            error_backoff_max_ms: 30_000,
            workers: 4,
            reconcile_timeout_ms: 30_000,
        }
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms.max(1))
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }
}
