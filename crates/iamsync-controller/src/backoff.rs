//! Per-key requeue delays.

use crate::config::ControllerConfig;
use crate::error::{ReconcileError, RetryClass};
use std::time::Duration;

/// Translates a reconcile failure into the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct RequeuePolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl RequeuePolicy {
    pub fn from_config(config: &ControllerConfig) -> Self {
        // A zero delay would spin on a persistently failing object.
        let base = config.error_backoff_base_ms.max(1);
        Self {
            base_backoff_ms: base,
            max_backoff_ms: config.error_backoff_max_ms.max(base),
        }
    }

    /// Backoff for the `failures`-th consecutive failure (1-indexed).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(30);
        let factor = 1u64 << exponent;
        let delay = self.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// `None` means do not requeue on a timer.
    pub fn delay_for(&self, error: &ReconcileError, failures: u32) -> Option<Duration> {
        match error.retry_class() {
            RetryClass::Immediate => Some(Duration::ZERO),
            RetryClass::Backoff => Some(self.backoff(failures)),
            RetryClass::Never => None,
        }
    }
}
