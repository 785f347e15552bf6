//! Channel membership reconciliation.
//!
//! Desired state: every tracked channel joined. Observed state: the JOIN and
//! KICK notifications the protocol client delivers about our own identity.
//! Each channel gets an independent loop that keeps retrying, with backoff,
//! until the two agree, and starts over whenever a kick makes them diverge.

use std::time::Duration;

use crate::backoff::BackoffParams;

pub mod channel_state;
pub mod registry;
pub mod signal;

pub use channel_state::{ChannelState, ChannelStatus};
pub use registry::{ChannelReconciler, JoinRequest};
pub use signal::JoinDone;

/// How long a join request may go unconfirmed before it is retried.
pub const JOIN_WAIT: Duration = Duration::from_secs(10);

/// Timing knobs shared by every loop of a reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Confirmation window after each join request.
    pub join_wait: Duration,
    /// Bounds passed to each loop's delayer.
    pub backoff: BackoffParams,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            join_wait: JOIN_WAIT,
            backoff: BackoffParams::default(),
        }
    }
}
