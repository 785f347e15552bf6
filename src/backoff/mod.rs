//! Retry pacing for membership loops.
//!
//! A loop never sleeps on its own: it asks its `Delayer` to wait out the
//! current backoff step, and the delayer decides how long that is. Every wait
//! is cancellable so a stopping reconciler never leaves a task asleep.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod exponential;

pub use exponential::{ExponentialDelayer, ExponentialDelayerFactory};

/// Bounds handed to a delayer when a loop is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffParams {
    /// Upper bound for a single wait.
    pub max_delay: Duration,
    /// Calm period after which the step falls back to `initial_delay`.
    pub reset_after: Duration,
    /// First (and floor) wait.
    pub initial_delay: Duration,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(300),
            reset_after: Duration::from_secs(1800),
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffParams {
    /// Create backoff bounds.
    pub fn new(max_delay: Duration, reset_after: Duration, initial_delay: Duration) -> Self {
        Self {
            max_delay,
            reset_after,
            initial_delay,
        }
    }
}

/// Stateful, per-loop wait with an increasing step.
#[async_trait]
pub trait Delayer: Send {
    /// Wait out the current step.
    ///
    /// Returns `true` when the wait completed and `false` when `cancel` fired
    /// first.
    async fn delay(&mut self, cancel: &CancellationToken) -> bool;
}

/// Produces one delayer per membership loop.
pub trait DelayerFactory: Send + Sync {
    fn new_delayer(&self, params: BackoffParams) -> Box<dyn Delayer>;
}
