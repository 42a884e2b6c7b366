use crate::connection::{SubscriberId, SubscriberReceiver, SubscriberSet};
use crate::key::BroadcasterKey;
use crate::manager::SessionMap;
use crate::message::Event;
use crate::settings::RelaySettings;
use events::{EventHandler, UpstreamConnector, UpstreamEventReceiver, UpstreamSession};
use log::*;
use serde::Serialize;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Connection state of the upstream feed behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of asking a session to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Failed,
    /// Another attempt is already in flight.
    InFlight,
    /// The previous attempt started less than the minimum spacing ago.
    TooSoon,
    AlreadyConnected,
    /// The handshake succeeded but the feed reported `Disconnected` before it
    /// completed.
    Lost,
    /// The session was torn down.
    Closed,
}

/// Everything mutated by subscribe, unsubscribe, upstream events and timers.
/// Only ever touched while holding the session's state lock.
struct SessionState {
    subscribers: SubscriberSet,
    upstream_state: UpstreamState,
    last_connect_attempt: Option<Instant>,
    /// Set when the feed reports `Disconnected` during a connect attempt.
    disconnect_seen: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    idle_timer: Option<JoinHandle<()>>,
    closed: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            subscribers: SubscriberSet::new(),
            upstream_state: UpstreamState::Disconnected,
            last_connect_attempt: None,
            disconnect_seen: false,
            reconnect_timer: None,
            idle_timer: None,
            closed: false,
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn cancel_idle_teardown(&mut self) -> bool {
        match self.idle_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

/// Point-in-time view of a session, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub broadcaster: String,
    pub subscribers: usize,
    pub upstream_state: UpstreamState,
    pub idle_teardown_pending: bool,
    pub reconnect_pending: bool,
}

/// Binds one upstream session to the subscribers of one broadcaster.
pub struct BroadcasterSession {
    key: BroadcasterKey,
    upstream: Arc<dyn UpstreamSession>,
    settings: Arc<RelaySettings>,
    sessions: Weak<SessionMap>,
    me: Weak<BroadcasterSession>,
    event_pump: OnceLock<JoinHandle<()>>,
    state: Mutex<SessionState>,
}

impl BroadcasterSession {
    /// Opens the upstream session for `key` and starts delivering its events
    /// to the new entry. Performs no I/O; call `connect` to go live.
    pub(crate) fn open(
        key: BroadcasterKey,
        connector: &dyn UpstreamConnector,
        settings: Arc<RelaySettings>,
        sessions: &Arc<SessionMap>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = events::event_channel();
        let upstream = connector.open(key.as_str(), events_tx);

        let session = Arc::new_cyclic(|me| Self {
            key,
            upstream,
            settings,
            sessions: Arc::downgrade(sessions),
            me: me.clone(),
            event_pump: OnceLock::new(),
            state: Mutex::new(SessionState::new()),
        });
        session.start_event_pump(events_rx);
        session
    }

    pub fn key(&self) -> &BroadcasterKey {
        &self.key
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    pub async fn upstream_state(&self) -> UpstreamState {
        self.state.lock().await.upstream_state
    }

    /// True while a connect attempt is in flight.
    pub async fn is_connecting(&self) -> bool {
        self.upstream_state().await == UpstreamState::Connecting
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn idle_teardown_pending(&self) -> bool {
        self.state.lock().await.idle_timer.is_some()
    }

    pub async fn reconnect_pending(&self) -> bool {
        self.state.lock().await.reconnect_timer.is_some()
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        SessionStats {
            broadcaster: self.key.to_string(),
            subscribers: state.subscribers.len(),
            upstream_state: state.upstream_state,
            idle_teardown_pending: state.idle_timer.is_some(),
            reconnect_pending: state.reconnect_timer.is_some(),
        }
    }

    /// Upstream events are handled one at a time, in arrival order. The pump
    /// only holds a weak reference so a removed entry is not kept alive by it.
    fn start_event_pump(&self, mut events: UpstreamEventReceiver) {
        let me = self.me.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = me.upgrade() else {
                    break;
                };
                session.handle(&event).await;
            }
        });
        let _ = self.event_pump.set(pump);
    }

    fn stop_event_pump(&self) {
        if let Some(pump) = self.event_pump.get() {
            pump.abort();
        }
    }

    /// Kicks off a connect attempt in the background.
    pub(crate) fn spawn_connect(&self) {
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Some(session) = me.upgrade() {
                session.connect().await;
            }
        });
    }

    /// Attempts to connect upstream, unless an attempt is already in flight or
    /// the last one started less than `min_connect_spacing` ago.
    pub async fn connect(&self) -> ConnectOutcome {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return ConnectOutcome::Closed;
            }
            match state.upstream_state {
                UpstreamState::Connecting => {
                    debug!("Connect attempt for @{} already in flight", self.key);
                    return ConnectOutcome::InFlight;
                }
                UpstreamState::Connected => return ConnectOutcome::AlreadyConnected,
                UpstreamState::Disconnected => {}
            }
            if let Some(last_attempt) = state.last_connect_attempt {
                let elapsed = last_attempt.elapsed();
                if elapsed < self.settings.min_connect_spacing {
                    let wait = self.settings.min_connect_spacing - elapsed;
                    debug!(
                        "Suppressing connect attempt for @{}: last attempt {:?} ago",
                        self.key, elapsed
                    );
                    // A watched session must not be left without a pending attempt
                    if !state.subscribers.is_empty() && state.reconnect_timer.is_none() {
                        self.arm_reconnect(&mut state, wait);
                    }
                    return ConnectOutcome::TooSoon;
                }
            }
            state.upstream_state = UpstreamState::Connecting;
            state.last_connect_attempt = Some(Instant::now());
            state.disconnect_seen = false;
        }

        info!("⚡ Connecting to upstream chat for @{}", self.key);
        let result = self.upstream.connect().await;

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            if result.is_ok() {
                // Torn down while the handshake was in flight
                self.upstream.disconnect().await;
            }
            return ConnectOutcome::Closed;
        }

        let disconnect_seen = std::mem::take(&mut state.disconnect_seen);
        match result {
            Ok(()) if disconnect_seen => {
                warn!("Upstream for @{} dropped before the handshake completed", self.key);
                if self.feed_lost(&mut state) {
                    drop(state);
                    self.upstream.disconnect().await;
                    self.stop_event_pump();
                }
                ConnectOutcome::Lost
            }
            Ok(()) => {
                state.upstream_state = UpstreamState::Connected;
                info!("✅ Connected to @{}", self.key);
                ConnectOutcome::Connected
            }
            Err(e) => {
                state.upstream_state = UpstreamState::Disconnected;
                warn!("❌ Failed to connect to @{}: {e}", self.key);
                if !state.subscribers.is_empty() {
                    info!(
                        "🔁 Retrying @{} in {:?}",
                        self.key, self.settings.connect_retry_delay
                    );
                    self.arm_reconnect(&mut state, self.settings.connect_retry_delay);
                } else if state.idle_timer.is_none() {
                    self.arm_idle_teardown(&mut state);
                }
                ConnectOutcome::Failed
            }
        }
    }

    /// Adds a subscriber and queues the confirmation frame on it. Returns
    /// `None` if the session was torn down in the meantime.
    pub(crate) async fn attach(&self) -> Option<(SubscriberId, SubscriberReceiver)> {
        let (sender, receiver) = mpsc::channel(self.settings.subscriber_buffer.max(1));

        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        if state.cancel_idle_teardown() {
            info!("♻️ Subscriber returned to @{}, idle teardown cancelled", self.key);
        }

        // Queued before registration so no chat frame can overtake it
        let _ = sender.try_send(Event::connected(&self.key));
        let subscriber_id = state.subscribers.register(sender);
        info!(
            "👤 Subscriber {} joined @{} ({} attached)",
            subscriber_id.as_str(),
            self.key,
            state.subscribers.len()
        );

        let needs_connect = state.upstream_state == UpstreamState::Disconnected
            && state.reconnect_timer.is_none();
        drop(state);

        if needs_connect {
            self.spawn_connect();
        }
        Some((subscriber_id, receiver))
    }

    /// Removes a subscriber. When the last one leaves, the idle teardown
    /// timer is armed. Removing an unknown subscriber is a no-op.
    pub(crate) async fn detach(&self, subscriber_id: &SubscriberId) {
        let mut state = self.state.lock().await;
        if !state.subscribers.unregister(subscriber_id) {
            return;
        }

        let remaining = state.subscribers.len();
        info!(
            "👋 Subscriber {} left @{} ({} left)",
            subscriber_id.as_str(),
            self.key,
            remaining
        );

        if remaining == 0 && !state.closed {
            self.arm_idle_teardown(&mut state);
        }
    }

    /// Delivers one chat comment to every attached subscriber.
    pub(crate) async fn fan_out(&self, unique_id: &str, comment: &str) {
        let event = Event::chat(unique_id, comment, &self.settings.message_color);

        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let delivered = state.subscribers.broadcast(&self.key, &event);
        trace!(
            "Relayed message from {} on @{} to {}/{} subscriber(s)",
            unique_id,
            self.key,
            delivered,
            state.subscribers.len()
        );
    }

    /// Upstream reported `Disconnected`: reconnect if anyone is watching,
    /// otherwise drop the entry right away. While a connect attempt is in
    /// flight the event is recorded and acted on once the attempt returns.
    pub(crate) async fn handle_disconnected(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        if state.upstream_state == UpstreamState::Connecting {
            debug!("@{} reported a disconnect during its connect attempt", self.key);
            state.disconnect_seen = true;
            return;
        }
        if self.feed_lost(&mut state) {
            drop(state);
            self.stop_event_pump();
        }
    }

    /// Tears the session down: closes all subscriber streams, disconnects
    /// upstream and removes the entry from the pool.
    pub(crate) async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let closed = self.close(&mut state);
        drop(state);

        self.upstream.disconnect().await;
        self.stop_event_pump();
        info!("🛑 Shut down @{} ({} subscriber(s) closed)", self.key, closed);
    }

    async fn expire_idle(&self) {
        let mut state = self.state.lock().await;
        // This timer is firing; forget its handle rather than aborting it
        state.idle_timer.take();
        if state.closed || !state.subscribers.is_empty() {
            return;
        }
        self.close(&mut state);
        drop(state);

        self.upstream.disconnect().await;
        self.stop_event_pump();
        info!("🛑 Disconnected idle @{}", self.key);
    }

    async fn fire_reconnect(&self) {
        {
            let mut state = self.state.lock().await;
            state.reconnect_timer.take();
            if state.closed {
                return;
            }
        }
        self.connect().await;
    }

    /// Reacts to the loss of the upstream feed. Returns true if the session
    /// was closed, in which case the caller stops the event pump once the
    /// state lock is released.
    fn feed_lost(&self, state: &mut SessionState) -> bool {
        state.upstream_state = UpstreamState::Disconnected;
        info!("🛑 Disconnected from @{}", self.key);

        if !state.subscribers.is_empty() {
            info!(
                "🔁 Reconnecting to @{} in {:?}",
                self.key, self.settings.reconnect_delay
            );
            self.arm_reconnect(state, self.settings.reconnect_delay);
            false
        } else {
            self.close(state);
            info!("Removed unwatched @{} from the pool", self.key);
            true
        }
    }

    /// Marks the session closed and removes it from the pool. Must be called
    /// with the state lock held so no attach can slip in afterwards.
    fn close(&self, state: &mut SessionState) -> usize {
        state.closed = true;
        state.upstream_state = UpstreamState::Disconnected;
        state.cancel_reconnect();
        state.cancel_idle_teardown();
        let closed = state.subscribers.close_all();

        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove_if(&self.key, |_, entry| std::ptr::eq(Arc::as_ptr(entry), self));
        }
        closed
    }

    /// Re-arming supersedes any pending reconnect.
    fn arm_reconnect(&self, state: &mut SessionState, delay: Duration) {
        state.cancel_reconnect();
        let me = self.me.clone();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = me.upgrade() {
                session.fire_reconnect().await;
            }
        }));
    }

    /// Re-arming supersedes any pending idle teardown.
    fn arm_idle_teardown(&self, state: &mut SessionState) {
        state.cancel_idle_teardown();
        let grace = self.settings.idle_grace_period;
        info!("🕐 No subscribers for @{}, disconnecting in {:?}", self.key, grace);

        let me = self.me.clone();
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = me.upgrade() {
                session.expire_idle().await;
            }
        }));
    }
}
