//! Per-channel membership loop.
//!
//! `ChannelState` owns one channel's joined flag and completion signal and
//! runs the task that drives the channel toward "joined":
//!
//! - not joined: wait out the backoff step, send a join request, then wait
//!   for the confirmation, the join window to lapse, or cancellation
//! - joined: park until the membership is lost or the scope is cancelled
//!
//! The task re-reads the joined flag at the top of every iteration, so the
//! wake notice sent on unset only has to shorten the park, never carry state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::signal::{JoinDone, JoinSignal};
use crate::backoff::Delayer;
use crate::channel::ChannelIdentity;
use crate::client::ProtocolClient;

/// Point-in-time view of one tracked channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub name: String,
    pub joined: bool,
    /// Number of times membership has been lost since the loop was created.
    pub generation: u64,
}

#[derive(Debug)]
struct JoinState {
    joined: bool,
    signal: JoinSignal,
}

/// One channel's join state and convergence task.
pub struct ChannelState {
    channel: ChannelIdentity,
    client: Arc<dyn ProtocolClient>,
    join_wait: Duration,
    state: Mutex<JoinState>,
    /// Single stored permit; see module docs.
    unset_notice: Notify,
}

impl ChannelState {
    pub fn new(channel: ChannelIdentity, client: Arc<dyn ProtocolClient>, join_wait: Duration) -> Self {
        Self {
            channel,
            client,
            join_wait,
            state: Mutex::new(JoinState {
                joined: false,
                signal: JoinSignal::new(0),
            }),
            unset_notice: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.channel.name
    }

    pub fn is_joined(&self) -> bool {
        self.lock().joined
    }

    /// Completion handle for the current generation.
    pub fn join_done(&self) -> JoinDone {
        self.lock().signal.subscribe()
    }

    pub fn status(&self) -> ChannelStatus {
        let state = self.lock();
        ChannelStatus {
            name: self.channel.name.clone(),
            joined: state.joined,
            generation: state.signal.generation(),
        }
    }

    /// Record a confirmed join. No-op when already joined.
    pub fn set_joined(&self) {
        let mut state = self.lock();

        if state.joined {
            log::debug!("Not setting JOIN state on channel {}: already set", self.channel.name);
            return;
        }

        log::info!("Setting JOIN state on channel {}", self.channel.name);
        state.joined = true;
        state.signal.complete();
    }

    /// Record a lost membership. No-op when not joined.
    pub fn unset_joined(&self) {
        let mut state = self.lock();

        if !state.joined {
            log::debug!("Not removing JOIN state on channel {}: already not set", self.channel.name);
            return;
        }

        log::info!("Removing JOIN state on channel {}", self.channel.name);
        state.joined = false;
        state.signal = state.signal.next();
        drop(state);

        self.unset_notice.notify_one();
    }

    /// Convergence task; returns once `cancel` fires.
    pub async fn monitor(self: Arc<Self>, mut delayer: Box<dyn Delayer>, cancel: CancellationToken) {
        log::debug!("Channel {} monitor: started", self.channel.name);

        while !cancel.is_cancelled() {
            if self.is_joined() {
                self.monitor_join_unset(&cancel).await;
            } else {
                self.join(delayer.as_mut(), &cancel).await;
            }
        }

        log::debug!("Channel {} monitor: stopped", self.channel.name);
    }

    async fn join(&self, delayer: &mut dyn Delayer, cancel: &CancellationToken) {
        log::info!("Channel {} monitor: waiting to join", self.channel.name);
        if !delayer.delay(cancel).await {
            return;
        }

        let mut done = self.join_done();
        self.client.send_join(&self.channel.name, &self.channel.password);
        log::info!("Channel {} monitor: join request sent", self.channel.name);

        tokio::select! {
            joined = done.wait() => {
                if joined {
                    log::info!("Channel {} monitor: join succeeded", self.channel.name);
                }
            }
            _ = tokio::time::sleep(self.join_wait) => {
                log::warn!(
                    "Channel {} monitor: could not join after {:?}, will retry",
                    self.channel.name,
                    self.join_wait
                );
            }
            _ = cancel.cancelled() => {
                log::info!("Channel {} monitor: cancelled while waiting for join", self.channel.name);
            }
        }
    }

    async fn monitor_join_unset(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = self.unset_notice.notified() => {
                log::info!("Channel {} monitor: woken, rechecking membership", self.channel.name);
            }
            _ = cancel.cancelled() => {
                log::info!("Channel {} monitor: cancelled while monitoring", self.channel.name);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
