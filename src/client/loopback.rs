//! In-process simulated chat server.
//!
//! `LoopbackClient` answers join requests itself: by default every request
//! is confirmed with a JOIN event for our own identity, optionally after a
//! latency. Channels can be silenced (requests are recorded but never
//! confirmed) or keyed (requests with the wrong password are ignored), and
//! JOIN/KICK events for any identity can be injected by hand.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::{MembershipHandler, ProtocolClient};

/// A join request as seen by the simulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub channel: String,
    pub password: String,
    pub at: Instant,
}

#[derive(Default)]
struct LoopbackState {
    join_handlers: Vec<MembershipHandler>,
    kick_handlers: Vec<MembershipHandler>,
    requests: Vec<JoinRecord>,
    silent: HashSet<String>,
    keys: HashMap<String, String>,
    members: HashSet<String>,
    auto_confirm: bool,
    confirm_latency: Duration,
}

struct Inner {
    nick: String,
    state: Mutex<LoopbackState>,
    /// Bumped after every recorded join request.
    requests_tx: watch::Sender<u64>,
}

/// Simulated connection; clones share the same server.
#[derive(Clone)]
pub struct LoopbackClient {
    inner: Arc<Inner>,
}

impl LoopbackClient {
    /// Create a client known to the server as `nick`, auto-confirming joins.
    pub fn new(nick: impl Into<String>) -> Self {
        let (requests_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                nick: nick.into(),
                state: Mutex::new(LoopbackState {
                    auto_confirm: true,
                    ..Default::default()
                }),
                requests_tx,
            }),
        }
    }

    /// Enable or disable automatic JOIN confirmation.
    pub fn with_auto_confirm(self, auto_confirm: bool) -> Self {
        self.state().auto_confirm = auto_confirm;
        self
    }

    /// Delay automatic confirmations by `latency`.
    pub fn with_confirm_latency(self, latency: Duration) -> Self {
        self.state().confirm_latency = latency;
        self
    }

    /// Require `key` to join `channel`.
    pub fn with_channel_key(self, channel: &str, key: &str) -> Self {
        self.state().keys.insert(channel.to_string(), key.to_string());
        self
    }

    /// Stop (or resume) confirming joins for `channel`.
    pub fn set_silent(&self, channel: &str, silent: bool) {
        let mut state = self.state();
        if silent {
            state.silent.insert(channel.to_string());
        } else {
            state.silent.remove(channel);
        }
    }

    /// All join requests recorded for `channel`, oldest first.
    pub fn join_requests(&self, channel: &str) -> Vec<JoinRecord> {
        self.state()
            .requests
            .iter()
            .filter(|record| record.channel == channel)
            .cloned()
            .collect()
    }

    /// Number of join requests recorded for `channel`.
    pub fn join_count(&self, channel: &str) -> usize {
        self.state().requests.iter().filter(|record| record.channel == channel).count()
    }

    /// Wait until at least `count` join requests for `channel` were recorded.
    pub async fn wait_for_joins(&self, channel: &str, count: usize) {
        let mut rx = self.inner.requests_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on success.
        let _ = rx.wait_for(|_| self.join_count(channel) >= count).await;
    }

    /// Whether the server currently considers us a member of `channel`.
    pub fn is_member(&self, channel: &str) -> bool {
        self.state().members.contains(channel)
    }

    /// Number of registered `(join, kick)` handlers.
    pub fn handler_counts(&self) -> (usize, usize) {
        let state = self.state();
        (state.join_handlers.len(), state.kick_handlers.len())
    }

    /// Deliver a JOIN event for `nick` on `channel`.
    pub fn inject_join(&self, nick: &str, channel: &str) {
        let handlers = {
            let mut state = self.state();
            if nick == self.inner.nick {
                state.members.insert(channel.to_string());
            }
            state.join_handlers.clone()
        };

        log::debug!("Loopback: JOIN {} {}", nick, channel);
        for handler in handlers {
            handler(nick, channel);
        }
    }

    /// Deliver a KICK event removing `nick` from `channel`.
    pub fn inject_kick(&self, nick: &str, channel: &str) {
        let handlers = {
            let mut state = self.state();
            if nick == self.inner.nick {
                state.members.remove(channel);
            }
            state.kick_handlers.clone()
        };

        log::debug!("Loopback: KICK {} {}", nick, channel);
        for handler in handlers {
            handler(nick, channel);
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latency to confirm a request with, or `None` if it goes unanswered.
    fn confirmation_for(&self, channel: &str, password: &str) -> Option<Duration> {
        let state = self.state();
        if !state.auto_confirm || state.silent.contains(channel) {
            return None;
        }
        match state.keys.get(channel) {
            Some(key) if key != password => None,
            _ => Some(state.confirm_latency),
        }
    }
}

impl ProtocolClient for LoopbackClient {
    /// Must be called from within a Tokio runtime when auto-confirming.
    fn send_join(&self, channel: &str, password: &str) {
        self.state().requests.push(JoinRecord {
            channel: channel.to_string(),
            password: password.to_string(),
            at: Instant::now(),
        });
        self.inner.requests_tx.send_modify(|count| *count += 1);

        let Some(latency) = self.confirmation_for(channel, password) else {
            log::debug!("Loopback: leaving JOIN {} unanswered", channel);
            return;
        };

        let client = self.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let nick = client.inner.nick.clone();
            client.inject_join(&nick, &channel);
        });
    }

    fn local_identity(&self) -> String {
        self.inner.nick.clone()
    }

    fn on_join(&self, handler: MembershipHandler) {
        self.state().join_handlers.push(handler);
    }

    fn on_kick(&self, handler: MembershipHandler) {
        self.state().kick_handlers.push(handler);
    }
}
