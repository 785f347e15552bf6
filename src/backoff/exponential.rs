//! Doubling backoff with a ceiling and a calm-period reset.
//!
//! The step starts at `initial_delay` and doubles after every completed
//! wait, capped at `max_delay`. When more than `reset_after` has passed since
//! the previous wait finished, the loop is considered to have been healthy in
//! between and the step drops back to `initial_delay`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BackoffParams, Delayer, DelayerFactory};

/// Exponential delayer driven by `tokio::time`.
#[derive(Debug)]
pub struct ExponentialDelayer {
    params: BackoffParams,
    /// Duration of the next wait.
    next_delay: Duration,
    /// When the previous wait completed.
    last_finished: Option<Instant>,
}

impl ExponentialDelayer {
    pub fn new(params: BackoffParams) -> Self {
        Self {
            params,
            next_delay: params.initial_delay.min(params.max_delay),
            last_finished: None,
        }
    }

    /// Step the next `delay` call will wait, before any calm-period reset.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    fn reset_if_calm(&mut self) {
        let calm = self
            .last_finished
            .map(|finished| finished.elapsed() >= self.params.reset_after)
            .unwrap_or(false);

        if calm {
            log::debug!(
                "Backoff calm for at least {:?}, resetting step to {:?}",
                self.params.reset_after,
                self.params.initial_delay
            );
            self.next_delay = self.params.initial_delay.min(self.params.max_delay);
        }
    }
}

#[async_trait]
impl Delayer for ExponentialDelayer {
    async fn delay(&mut self, cancel: &CancellationToken) -> bool {
        self.reset_if_calm();

        let delay = self.next_delay;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        self.next_delay = delay.saturating_mul(2).min(self.params.max_delay);
        self.last_finished = Some(Instant::now());
        true
    }
}

/// Factory handing out independent `ExponentialDelayer`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialDelayerFactory;

impl DelayerFactory for ExponentialDelayerFactory {
    fn new_delayer(&self, params: BackoffParams) -> Box<dyn Delayer> {
        Box::new(ExponentialDelayer::new(params))
    }
}
