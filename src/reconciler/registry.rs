//! Channel reconciler: one membership loop per tracked channel.
//!
//! The reconciler owns the name -> loop map, routes JOIN/KICK notifications
//! from the protocol client to the matching loop, and runs every loop under
//! a shared lifecycle scope (cancellation token plus task tracker). The map
//! and the scope always change together under the registry mutex; waiting
//! for cancelled loops happens after the mutex is released.
//!
//! Locking is two-tier: the registry mutex guards the map and the active
//! scope, each `ChannelState` guards its own join state. `start` and `stop`
//! are additionally serialized by an async lifecycle lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::ReconcilerSettings;
use super::channel_state::{ChannelState, ChannelStatus};
use super::signal::JoinDone;
use crate::backoff::DelayerFactory;
use crate::channel::ChannelIdentity;
use crate::client::ProtocolClient;
use crate::config::Config;

/// Outcome of `ChannelReconciler::join_channel`.
#[derive(Debug)]
pub enum JoinRequest {
    /// The channel is joined right now.
    AlreadyJoined,
    /// The channel is being converged; wait on the handle for completion.
    Pending(JoinDone),
    /// The reconciler is not running, so no loop could be created.
    Inactive,
}

impl JoinRequest {
    pub fn is_joined(&self) -> bool {
        matches!(self, JoinRequest::AlreadyJoined)
    }

    /// Completion handle, if the join is pending.
    pub fn into_done(self) -> Option<JoinDone> {
        match self {
            JoinRequest::Pending(done) => Some(done),
            _ => None,
        }
    }
}

/// Loops started under one `start`.
struct Scope {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// A scope taken out of the registry together with the loops it ran.
type Detached = (Scope, HashMap<String, Arc<ChannelState>>);

#[derive(Default)]
struct Registry {
    channels: HashMap<String, Arc<ChannelState>>,
    scope: Option<Scope>,
}

struct Inner {
    desired: Vec<ChannelIdentity>,
    client: Arc<dyn ProtocolClient>,
    delayers: Arc<dyn DelayerFactory>,
    settings: ReconcilerSettings,
    registry: Mutex<Registry>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, channel: &str) -> Option<Arc<ChannelState>> {
        self.registry().channels.get(channel).cloned()
    }

    /// Create a loop for `channel` and start its task under `scope`.
    fn spawn_channel(&self, scope: &Scope, channel: ChannelIdentity) -> Arc<ChannelState> {
        let state = Arc::new(ChannelState::new(
            channel,
            Arc::clone(&self.client),
            self.settings.join_wait,
        ));
        let delayer = self.delayers.new_delayer(self.settings.backoff);
        scope.tasks.spawn(Arc::clone(&state).monitor(delayer, scope.cancel.clone()));
        state
    }
}

/// Keeps every tracked channel joined. Clones share the same registry.
#[derive(Clone)]
pub struct ChannelReconciler {
    inner: Arc<Inner>,
}

impl ChannelReconciler {
    /// Create a reconciler for `config`'s channels and register its JOIN and
    /// KICK handlers on `client`.
    ///
    /// No loop runs until `start`.
    pub fn new(config: &Config, client: Arc<dyn ProtocolClient>, delayers: Arc<dyn DelayerFactory>) -> Self {
        let reconciler = Self {
            inner: Arc::new(Inner {
                desired: config.channels.clone(),
                client,
                delayers,
                settings: config.settings(),
                registry: Mutex::new(Registry::default()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        };

        reconciler.register_handlers();
        reconciler
    }

    fn register_handlers(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.client.on_join(Arc::new(move |nick: &str, channel: &str| {
            if let Some(reconciler) = Self::upgrade(&weak) {
                reconciler.handle_join(nick, channel);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        self.inner.client.on_kick(Arc::new(move |nick: &str, channel: &str| {
            if let Some(reconciler) = Self::upgrade(&weak) {
                reconciler.handle_kick(nick, channel);
            }
        }));
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Route a JOIN notification. Called by the client's event dispatch.
    pub fn handle_join(&self, nick: &str, channel: &str) {
        if nick != self.inner.client.local_identity() {
            // somebody else joined
            return;
        }
        log::info!("Received JOIN confirmation for channel {}", channel);

        match self.inner.lookup(channel) {
            Some(state) => state.set_joined(),
            None => log::info!("Not processing JOIN for channel {}: unknown channel", channel),
        }
    }

    /// Route a KICK notification. Called by the client's event dispatch.
    pub fn handle_kick(&self, nick: &str, channel: &str) {
        if nick != self.inner.client.local_identity() {
            // somebody else was kicked
            return;
        }
        log::info!("Received KICK for channel {}", channel);

        match self.inner.lookup(channel) {
            Some(state) => state.unset_joined(),
            None => log::info!("Not processing KICK for channel {}: unknown channel", channel),
        }
    }

    /// Ensure `channel` is tracked and report whether it is joined.
    ///
    /// Never waits for convergence. A channel not seen before gets a new loop
    /// with an empty password. Must be called from within a Tokio runtime.
    pub fn join_channel(&self, channel: &str) -> JoinRequest {
        let mut guard = self.inner.registry();
        let registry = &mut *guard;

        let state = match registry.channels.get(channel) {
            Some(state) => Arc::clone(state),
            None => {
                let Some(scope) = registry.scope.as_ref() else {
                    log::warn!("Not joining channel {}: reconciler is not running", channel);
                    return JoinRequest::Inactive;
                };
                log::info!("Request to JOIN new channel {}", channel);
                let state = self.inner.spawn_channel(scope, ChannelIdentity::new(channel));
                registry.channels.insert(channel.to_string(), Arc::clone(&state));
                state
            }
        };
        drop(guard);

        let done = state.join_done();
        if done.is_done() {
            JoinRequest::AlreadyJoined
        } else {
            JoinRequest::Pending(done)
        }
    }

    /// Stop any previous run, then start one loop per configured channel
    /// under a scope derived from `parent`.
    ///
    /// The new scope and its loops replace the old ones in a single registry
    /// update, so `join_channel` never sees a gap. Returns once the old loops
    /// have exited.
    pub async fn start(&self, parent: &CancellationToken) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let scope = Scope {
            cancel: parent.child_token(),
            tasks: TaskTracker::new(),
        };

        let previous = {
            let mut guard = self.inner.registry();
            let registry = &mut *guard;
            let previous = Self::detach(registry);

            for channel in &self.inner.desired {
                if registry.channels.contains_key(&channel.name) {
                    log::warn!("Channel {} listed more than once, tracking it once", channel.name);
                    continue;
                }
                let state = self.inner.spawn_channel(&scope, channel.clone());
                registry.channels.insert(channel.name.clone(), state);
            }
            log::info!("Reconciler started with {} channels", registry.channels.len());
            registry.scope = Some(scope);
            previous
        };

        Self::drain(previous).await;
    }

    /// Cancel the running scope, clear the registry, and wait for every loop
    /// task to exit. No-op when not started.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = Self::detach(&mut self.inner.registry());
        Self::drain(previous).await;
    }

    /// Take the scope and map out together and cancel the scope's loops.
    fn detach(registry: &mut Registry) -> Option<Detached> {
        let scope = registry.scope.take()?;
        let channels = std::mem::take(&mut registry.channels);
        scope.cancel.cancel();
        scope.tasks.close();
        Some((scope, channels))
    }

    async fn drain(previous: Option<Detached>) {
        let Some((scope, channels)) = previous else {
            log::debug!("Reconciler not running, nothing to stop");
            return;
        };

        scope.tasks.wait().await;
        log::info!("Reconciler stopped, dropping {} channels", channels.len());
    }

    /// Whether a scope is active and not cancelled.
    pub fn is_running(&self) -> bool {
        self.inner
            .registry()
            .scope
            .as_ref()
            .map(|scope| !scope.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Status of every tracked channel, sorted by name.
    pub fn snapshot(&self) -> Vec<ChannelStatus> {
        let states: Vec<Arc<ChannelState>> = self.inner.registry().channels.values().cloned().collect();
        let mut statuses: Vec<ChannelStatus> = states.iter().map(|state| state.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Number of live loop tasks in the current scope.
    pub fn running_tasks(&self) -> usize {
        self.inner
            .registry()
            .scope
            .as_ref()
            .map(|scope| scope.tasks.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffParams, Delayer, ExponentialDelayerFactory};
    use crate::client::LoopbackClient;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn reconciler(client: &LoopbackClient, channels: &[&str]) -> ChannelReconciler {
        let config = Config::with_channels("me", channels);
        ChannelReconciler::new(&config, Arc::new(client.clone()), Arc::new(ExponentialDelayerFactory))
    }

    /// Waits a second per step and keeps running for another second after
    /// cancellation, so a restart has old loops to drain.
    struct LingeringDelayer {
        waiting: Arc<Notify>,
        cancelled: Arc<Notify>,
    }

    #[async_trait]
    impl Delayer for LingeringDelayer {
        async fn delay(&mut self, cancel: &CancellationToken) -> bool {
            self.waiting.notify_one();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.notify_one();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    false
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => true,
            }
        }
    }

    #[derive(Default)]
    struct LingeringFactory {
        waiting: Arc<Notify>,
        cancelled: Arc<Notify>,
    }

    impl DelayerFactory for LingeringFactory {
        fn new_delayer(&self, _params: BackoffParams) -> Box<dyn Delayer> {
            Box::new(LingeringDelayer {
                waiting: Arc::clone(&self.waiting),
                cancelled: Arc::clone(&self.cancelled),
            })
        }
    }

    #[test]
    fn test_new_registers_one_handler_per_event() {
        let client = LoopbackClient::new("me");
        let _reconciler = reconciler(&client, &["#a"]);
        assert_eq!(client.handler_counts(), (1, 1));
    }

    #[test]
    fn test_not_running_before_start() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);
        assert!(!reconciler.is_running());
        assert!(reconciler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);
        reconciler.stop().await;
        assert!(!reconciler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_creates_loop_per_desired_channel() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &["#a", "#b", "#a"]);
        reconciler.start(&CancellationToken::new()).await;

        let names: Vec<String> = reconciler.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["#a".to_string(), "#b".to_string()]);
        assert_eq!(reconciler.running_tasks(), 2);
        assert!(reconciler.is_running());

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_channel_creates_loop_once() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &[]);
        reconciler.start(&CancellationToken::new()).await;

        let first = reconciler.join_channel("#new").into_done().unwrap();
        let second = reconciler.join_channel("#new").into_done().unwrap();

        assert_eq!(first.generation(), second.generation());
        assert_eq!(reconciler.snapshot().len(), 1);
        assert_eq!(reconciler.running_tasks(), 1);

        client.wait_for_joins("#new", 1).await;
        assert_eq!(client.join_requests("#new")[0].password, "");

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_channel_reports_already_joined() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);
        reconciler.start(&CancellationToken::new()).await;

        let mut done = reconciler.join_channel("#a").into_done().unwrap();
        assert!(done.wait().await);
        assert!(reconciler.join_channel("#a").is_joined());

        reconciler.stop().await;
    }

    #[tokio::test]
    async fn test_join_channel_when_stopped_is_inactive() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);

        assert!(matches!(reconciler.join_channel("#a"), JoinRequest::Inactive));
        assert!(reconciler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_events_for_unknown_channel_are_ignored() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);
        reconciler.start(&CancellationToken::new()).await;

        reconciler.handle_join("me", "#unknown");
        reconciler.handle_kick("me", "#unknown");

        assert!(reconciler.snapshot().iter().all(|status| status.name != "#unknown"));
        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_other_identity_are_ignored() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &["#a"]);
        reconciler.start(&CancellationToken::new()).await;

        reconciler.handle_join("someone", "#a");
        assert!(!reconciler.snapshot()[0].joined);

        reconciler.handle_join("me", "#a");
        assert!(reconciler.snapshot()[0].joined);

        reconciler.handle_kick("someone", "#a");
        assert!(reconciler.snapshot()[0].joined);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_registry() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &["#a", "#b"]);
        reconciler.start(&CancellationToken::new()).await;
        client.wait_for_joins("#b", 1).await;

        reconciler.stop().await;

        assert!(reconciler.snapshot().is_empty());
        assert_eq!(reconciler.running_tasks(), 0);
        assert!(!reconciler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_repopulates_from_desired_list() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &["#a"]);
        let parent = CancellationToken::new();

        reconciler.start(&parent).await;
        reconciler.join_channel("#extra");
        assert_eq!(reconciler.snapshot().len(), 2);

        reconciler.start(&parent).await;
        let names: Vec<String> = reconciler.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["#a".to_string()]);
        assert_eq!(reconciler.running_tasks(), 1);

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_loops() {
        let client = LoopbackClient::new("me").with_auto_confirm(false);
        let reconciler = reconciler(&client, &["#a"]);
        let parent = CancellationToken::new();
        reconciler.start(&parent).await;

        parent.cancel();
        assert!(!reconciler.is_running());

        tokio::time::timeout(Duration::from_secs(1), reconciler.stop()).await.unwrap();
        assert!(reconciler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_handlers_do_not_keep_reconciler_alive() {
        let client = LoopbackClient::new("me");
        let reconciler = reconciler(&client, &["#a"]);
        drop(reconciler);

        // Handlers hold a weak reference; dispatch after drop is a no-op.
        client.inject_join("me", "#a");
        client.inject_kick("me", "#a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_channel_during_restart_lands_in_new_scope() {
        let client = LoopbackClient::new("me");
        let factory = Arc::new(LingeringFactory::default());
        let config = Config::with_channels("me", &["#a"]);
        let reconciler = ChannelReconciler::new(&config, Arc::new(client.clone()), factory.clone());
        let parent = CancellationToken::new();

        reconciler.start(&parent).await;
        factory.waiting.notified().await;

        let restarting = tokio::spawn({
            let reconciler = reconciler.clone();
            let parent = parent.clone();
            async move { reconciler.start(&parent).await }
        });

        // The old "#a" loop has seen cancellation and is still winding down.
        factory.cancelled.notified().await;
        assert!(!restarting.is_finished());
        assert!(reconciler.is_running());

        assert!(matches!(reconciler.join_channel("#new"), JoinRequest::Pending(_)));
        let mut a_done = reconciler.join_channel("#a").into_done().unwrap();

        restarting.await.unwrap();
        let names: Vec<String> = reconciler.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["#a".to_string(), "#new".to_string()]);
        assert_eq!(reconciler.running_tasks(), 2);

        let joined = tokio::time::timeout(Duration::from_secs(30), a_done.wait()).await;
        assert_eq!(joined.ok(), Some(true));

        reconciler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_detaches_registry_before_draining() {
        let client = LoopbackClient::new("me");
        let factory = Arc::new(LingeringFactory::default());
        let config = Config::with_channels("me", &["#a"]);
        let reconciler = ChannelReconciler::new(&config, Arc::new(client.clone()), factory.clone());

        reconciler.start(&CancellationToken::new()).await;
        factory.waiting.notified().await;

        let stopping = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.stop().await }
        });

        factory.cancelled.notified().await;
        assert!(!stopping.is_finished());
        assert!(!reconciler.is_running());
        assert!(reconciler.snapshot().is_empty());
        assert!(matches!(reconciler.join_channel("#late"), JoinRequest::Inactive));

        stopping.await.unwrap();
        assert!(reconciler.snapshot().is_empty());
    }
}
