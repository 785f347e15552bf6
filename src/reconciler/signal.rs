//! Generational completion signal.
//!
//! Every "became joined" transition completes exactly one `JoinSignal`.
//! Leaving the channel retires that signal and installs the next
//! generation, so a handle taken after the reset can only be completed by
//! the next join, while handles from the previous generation keep reporting
//! the join they already observed.

use tokio::sync::watch;

/// Owner side of one generation, held under the channel's state lock.
#[derive(Debug)]
pub(crate) struct JoinSignal {
    generation: u64,
    tx: watch::Sender<bool>,
}

impl JoinSignal {
    pub(crate) fn new(generation: u64) -> Self {
        let (tx, _) = watch::channel(false);
        Self { generation, tx }
    }

    /// Mark this generation joined. Completion is permanent.
    pub(crate) fn complete(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle bound to this generation.
    pub(crate) fn subscribe(&self) -> JoinDone {
        JoinDone {
            generation: self.generation,
            rx: self.tx.subscribe(),
        }
    }

    /// A fresh, incomplete signal for the following generation.
    pub(crate) fn next(&self) -> Self {
        Self::new(self.generation.wrapping_add(1))
    }
}

/// Waiter side of a completion signal.
///
/// Bound to the generation that was current when it was obtained.
#[derive(Debug, Clone)]
pub struct JoinDone {
    generation: u64,
    rx: watch::Receiver<bool>,
}

impl JoinDone {
    /// Generation this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Non-blocking check.
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until this generation is joined.
    ///
    /// Returns `false` if the channel's loop was torn down (reconciler
    /// stopped) before the join happened.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|joined| *joined).await.is_ok()
    }
}
