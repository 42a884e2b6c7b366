use crate::connection::SubscriberId;
use crate::error::{Error, ErrorKind};
use crate::key::BroadcasterKey;
use crate::session::{BroadcasterSession, SessionStats};
use crate::settings::RelaySettings;
use crate::subscription::Subscription;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::UpstreamConnector;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) type SessionMap = DashMap<BroadcasterKey, Arc<BroadcasterSession>>;

/// The connection pool: one broadcaster session per key, shared by every
/// subscriber of that key.
///
/// Lookups and creation go through the map's per-shard locking, so two
/// concurrent subscribes for the same key never open two upstream sessions.
/// Each session guards its own state; there is no lock across keys.
pub struct Manager {
    sessions: Arc<SessionMap>,
    connector: Arc<dyn UpstreamConnector>,
    settings: Arc<RelaySettings>,
    shutting_down: AtomicBool,
}

impl Manager {
    pub fn new(connector: Arc<dyn UpstreamConnector>, settings: RelaySettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            connector,
            settings: Arc::new(settings),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Returns the session for `key`, creating it and starting its first
    /// connect attempt if there is none.
    pub fn get_or_create(&self, key: &BroadcasterKey) -> Arc<BroadcasterSession> {
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                info!("⚡ Creating new upstream session for @{}", key);
                let session = BroadcasterSession::open(
                    key.clone(),
                    self.connector.as_ref(),
                    Arc::clone(&self.settings),
                    &self.sessions,
                );
                entry.insert(Arc::clone(&session));
                session.spawn_connect();
                session
            }
        }
    }

    pub fn get(&self, key: &BroadcasterKey) -> Option<Arc<BroadcasterSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &BroadcasterKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<BroadcasterKey> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes the entry for `key` unconditionally, tearing down its
    /// upstream session and closing its subscribers.
    pub async fn remove(&self, key: &BroadcasterKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, session)) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Normalizes `raw_key` and attaches a new subscriber to its session.
    pub async fn subscribe(&self, raw_key: &str) -> Result<Subscription, Error> {
        let key = BroadcasterKey::parse(raw_key).map_err(|e| {
            warn!("Rejected subscription for {raw_key:?}: {e}");
            e
        })?;
        self.attach(key).await
    }

    pub async fn attach(&self, key: BroadcasterKey) -> Result<Subscription, Error> {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::ShuttingDown));
            }

            let session = self.get_or_create(&key);
            if let Some((subscriber_id, receiver)) = session.attach().await {
                // Shutdown may have drained the pool while this attach ran
                if self.shutting_down.load(Ordering::SeqCst) {
                    session.shutdown().await;
                    return Err(Error::new(ErrorKind::ShuttingDown));
                }
                return Ok(Subscription::new(session, subscriber_id, receiver));
            }

            // Lost a race with teardown; the closed entry is already out of the
            // map, so the next round creates a fresh one.
            debug!("Session for @{} closed during attach, retrying", key);
            self.sessions
                .remove_if(&key, |_, entry| Arc::ptr_eq(entry, &session));
        }
    }

    /// Detaches a subscriber explicitly. Idempotent.
    pub async fn unsubscribe(&self, key: &BroadcasterKey, subscriber_id: &SubscriberId) {
        if let Some(session) = self.get(key) {
            session.detach(subscriber_id).await;
        }
    }

    pub async fn stats(&self) -> Vec<SessionStats> {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = Vec::with_capacity(sessions.len());
        for session in sessions {
            stats.push(session.stats().await);
        }
        stats.sort_by(|a, b| a.broadcaster.cmp(&b.broadcaster));
        stats
    }

    /// Tears down every session and refuses new subscribers from now on.
    /// Entries created by subscribes already in flight are drained too, so
    /// nothing is dropped from the pool without being shut down.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        loop {
            let sessions: Vec<_> = self
                .sessions
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            if sessions.is_empty() {
                break;
            }
            info!("Shutting down {} upstream session(s)", sessions.len());

            for session in sessions {
                session.shutdown().await;
                self.sessions
                    .remove_if(session.key(), |_, entry| Arc::ptr_eq(entry, &session));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidKeyKind;
    use crate::message::Event;
    use crate::session::UpstreamState;
    use events::mock::MockConnector;
    use futures::StreamExt;
    use std::time::Duration;

    fn manager_with(connector: &Arc<MockConnector>) -> Manager {
        Manager::new(
            Arc::clone(connector) as Arc<dyn UpstreamConnector>,
            RelaySettings::default(),
        )
    }

    fn key(raw: &str) -> BroadcasterKey {
        BroadcasterKey::parse(raw).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn expect_chat(subscription: &mut Subscription) -> (String, String) {
        match subscription.recv().await {
            Some(Event::Chat(chat)) => (chat.user, chat.message),
            other => panic!("expected a chat frame, got {other:?}"),
        }
    }

    async fn expect_connected(subscription: &mut Subscription) {
        match subscription.recv().await {
            Some(Event::Connected { system, user }) => {
                assert_eq!(system, "connected");
                assert_eq!(&user, subscription.key().as_str());
            }
            other => panic!("expected the confirmation frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_relays_chat_and_expires_after_grace_period() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut subscription = manager.subscribe("abc").await.unwrap();
        expect_connected(&mut subscription).await;
        settle().await;

        let upstream = connector.latest("abc").unwrap();
        assert!(upstream.is_connected());

        upstream.emit_chat("u1", "hi");
        let (user, message) = expect_chat(&mut subscription).await;
        assert_eq!(user, "u1");
        assert_eq!(message, "hi");

        drop(subscription);
        settle().await;
        assert!(manager.contains(&key("abc")));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(manager.contains(&key("abc")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!manager.contains(&key("abc")));
        assert_eq!(upstream.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_and_case_variants_share_one_entry() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let first = manager.subscribe("@Foo").await.unwrap();
        let second = manager.subscribe("foo").await.unwrap();

        assert_eq!(first.key(), second.key());
        assert_eq!(manager.len(), 1);
        assert_eq!(connector.open_count("foo"), 1);
        assert_eq!(manager.get(&key("foo")).unwrap().subscriber_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribes_open_one_upstream_session() {
        let connector = Arc::new(MockConnector::new());
        let manager = Arc::new(manager_with(&connector));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let raw = if i % 2 == 0 { "@Race" } else { "race" };
                tokio::spawn(async move { manager.subscribe(raw).await.unwrap() })
            })
            .collect();

        let mut subscriptions = Vec::new();
        for handle in handles {
            subscriptions.push(handle.await.unwrap());
        }

        assert_eq!(connector.open_count("race"), 1);
        assert_eq!(manager.len(), 1);
        assert_eq!(
            manager.get(&key("race")).unwrap().subscriber_count().await,
            64
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_reaches_every_subscriber_in_order() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut subscriptions = Vec::new();
        for _ in 0..5 {
            let mut subscription = manager.subscribe("abc").await.unwrap();
            expect_connected(&mut subscription).await;
            subscriptions.push(subscription);
        }
        settle().await;

        let upstream = connector.latest("abc").unwrap();
        for n in 0..3 {
            upstream.emit_chat(&format!("u{n}"), &format!("message {n}"));
        }

        for subscription in subscriptions.iter_mut() {
            for n in 0..3 {
                let (user, message) = expect_chat(subscription).await;
                assert_eq!(user, format!("u{n}"));
                assert_eq!(message, format!("message {n}"));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_is_a_stream_of_frames() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        connector.latest("abc").unwrap().emit_chat("u1", "hi");

        let frames: Vec<Event> = subscription.take(2).collect().await;
        assert!(matches!(frames[0], Event::Connected { .. }));
        assert!(matches!(&frames[1], Event::Chat(chat) if chat.message == "hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_during_grace_period_reuses_session() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        let original = manager.get(&key("abc")).unwrap();

        drop(subscription);
        settle().await;
        assert!(original.idle_teardown_pending().await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let mut returning = manager.subscribe("abc").await.unwrap();
        expect_connected(&mut returning).await;
        assert!(!original.idle_teardown_pending().await);

        tokio::time::sleep(Duration::from_secs(120)).await;
        let current = manager.get(&key("abc")).unwrap();
        assert!(Arc::ptr_eq(&current, &original));
        assert_eq!(connector.open_count("abc"), 1);

        let upstream = connector.latest("abc").unwrap();
        assert_eq!(upstream.connect_count(), 1);
        assert_eq!(upstream.disconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_subscribers_reconnects_after_delay() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        let upstream = connector.latest("abc").unwrap();
        assert_eq!(upstream.connect_count(), 1);

        upstream.emit_disconnected();
        settle().await;
        let session = manager.get(&key("abc")).unwrap();
        assert_eq!(session.upstream_state().await, UpstreamState::Disconnected);
        assert!(session.reconnect_pending().await);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(upstream.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(upstream.connect_count(), 2);
        assert_eq!(session.upstream_state().await, UpstreamState::Connected);

        // Same upstream session, same subscriber stream
        assert_eq!(connector.open_count("abc"), 1);
        expect_connected(&mut subscription).await;
        upstream.emit_chat("u1", "back");
        assert_eq!(expect_chat(&mut subscription).await.1, "back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_without_subscribers_removes_entry_immediately() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        drop(subscription);
        settle().await;

        let upstream = connector.latest("abc").unwrap();
        upstream.emit_disconnected();
        settle().await;

        assert!(!manager.contains(&key("abc")));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(upstream.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_retries_after_backoff() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);
        connector.fail_first_connects(1);

        let _subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        let session = manager.get(&key("abc")).unwrap();
        let upstream = connector.latest("abc").unwrap();

        assert_eq!(upstream.connect_count(), 1);
        assert_eq!(session.upstream_state().await, UpstreamState::Disconnected);
        assert!(session.reconnect_pending().await);

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(upstream.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(upstream.connect_count(), 2);
        assert_eq!(session.upstream_state().await, UpstreamState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_failures_do_not_trigger_immediate_attempts() {
        let connector = Arc::new(MockConnector::new());
        let manager = Manager::new(
            Arc::clone(&connector) as Arc<dyn UpstreamConnector>,
            RelaySettings {
                connect_retry_delay: Duration::from_secs(1),
                ..RelaySettings::default()
            },
        );

        connector.fail_first_connects(2);

        let _subscription = manager.subscribe("abc").await.unwrap();
        settle().await;
        let session = manager.get(&key("abc")).unwrap();
        let upstream = connector.latest("abc").unwrap();
        assert_eq!(upstream.connect_count(), 1);

        // The 1s backoff fires inside the 5s spacing window and is deferred
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(upstream.connect_count(), 1);
        assert!(session.reconnect_pending().await);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(upstream.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_is_capped_without_slowing_others() {
        let connector = Arc::new(MockConnector::new());
        let manager = Manager::new(
            Arc::clone(&connector) as Arc<dyn UpstreamConnector>,
            RelaySettings {
                subscriber_buffer: 2,
                ..RelaySettings::default()
            },
        );

        let mut stalled = manager.subscribe("abc").await.unwrap();
        let mut active = manager.subscribe("abc").await.unwrap();
        expect_connected(&mut active).await;
        settle().await;

        let upstream = connector.latest("abc").unwrap();
        for i in 0..5 {
            upstream.emit_chat("u1", &format!("msg{i}"));
            assert_eq!(expect_chat(&mut active).await.1, format!("msg{i}"));
        }

        // Only the confirmation and the first comment fit the stalled buffer
        expect_connected(&mut stalled).await;
        assert_eq!(expect_chat(&mut stalled).await.1, "msg0");

        upstream.emit_chat("u1", "after");
        assert_eq!(expect_chat(&mut stalled).await.1, "after");
        assert_eq!(expect_chat(&mut active).await.1, "after");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_is_not_fatal() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut subscription = manager.subscribe("abc").await.unwrap();
        expect_connected(&mut subscription).await;
        settle().await;

        let upstream = connector.latest("abc").unwrap();
        upstream.emit_error("protocol hiccup");
        upstream.emit_chat("u1", "still here");

        assert_eq!(expect_chat(&mut subscription).await.1, "still here");
        let session = manager.get(&key("abc")).unwrap();
        assert_eq!(session.upstream_state().await, UpstreamState::Connected);
        assert!(!session.reconnect_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_keys_never_reach_the_pool() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let empty = manager.subscribe("@").await.err().unwrap();
        assert_eq!(
            empty.error_kind,
            ErrorKind::InvalidKey(InvalidKeyKind::Empty)
        );

        let malformed = manager.subscribe("a/b").await.err().unwrap();
        assert!(matches!(
            malformed.error_kind,
            ErrorKind::InvalidKey(InvalidKeyKind::Malformed(_))
        ));

        assert!(manager.is_empty());
        assert_eq!(connector.total_opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let subscription = manager.subscribe("abc").await.unwrap();
        let k = subscription.key().clone();
        let id = subscription.subscriber_id().clone();

        manager.unsubscribe(&k, &id).await;
        manager.unsubscribe(&k, &id).await;
        drop(subscription);
        settle().await;

        let session = manager.get(&k).unwrap();
        assert_eq!(session.subscriber_count().await, 0);
        assert!(session.idle_teardown_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_tears_down_entry_unconditionally() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut subscription = manager.subscribe("abc").await.unwrap();
        expect_connected(&mut subscription).await;
        settle().await;

        assert!(manager.remove(&key("abc")).await);
        assert!(!manager.remove(&key("abc")).await);
        assert!(manager.is_empty());
        assert!(subscription.recv().await.is_none());
        assert_eq!(connector.latest("abc").unwrap().disconnect_count(), 1);

        // The next subscriber gets a brand new upstream session
        let _again = manager.subscribe("abc").await.unwrap();
        assert_eq!(connector.open_count("abc"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_each_session() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let _a = manager.subscribe("alpha").await.unwrap();
        let _b1 = manager.subscribe("beta").await.unwrap();
        let _b2 = manager.subscribe("beta").await.unwrap();
        settle().await;

        let stats = manager.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].broadcaster, "alpha");
        assert_eq!(stats[0].subscribers, 1);
        assert_eq!(stats[1].broadcaster, "beta");
        assert_eq!(stats[1].subscribers, 2);
        assert_eq!(stats[1].upstream_state, UpstreamState::Connected);
        assert_eq!(manager.keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything_and_refuses_new_subscribers() {
        let connector = Arc::new(MockConnector::new());
        let manager = manager_with(&connector);

        let mut a = manager.subscribe("alpha").await.unwrap();
        let mut b = manager.subscribe("beta").await.unwrap();
        expect_connected(&mut a).await;
        expect_connected(&mut b).await;
        settle().await;

        manager.shutdown().await;

        assert!(manager.is_empty());
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert_eq!(connector.latest("alpha").unwrap().disconnect_count(), 1);
        assert_eq!(connector.latest("beta").unwrap().disconnect_count(), 1);

        let refused = manager.subscribe("alpha").await.err().unwrap();
        assert_eq!(refused.error_kind, ErrorKind::ShuttingDown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_racing_subscribes_leaves_nothing_behind() {
        let connector = Arc::new(MockConnector::new());
        let manager = Arc::new(manager_with(&connector));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    for _ in 0..(i % 4) {
                        tokio::task::yield_now().await;
                    }
                    manager.subscribe(&format!("racer{}", i % 8)).await
                })
            })
            .collect();

        tokio::task::yield_now().await;
        manager.shutdown().await;

        let mut subscriptions = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => assert_eq!(e.error_kind, ErrorKind::ShuttingDown),
            }
        }

        // Let in-flight connect attempts observe the teardown
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.is_empty());
        assert_eq!(connector.connected_count(), 0);

        // Every subscriber that got in is closed by the shutdown
        for mut subscription in subscriptions {
            let ended = tokio::time::timeout(Duration::from_secs(1), async {
                while subscription.recv().await.is_some() {}
            })
            .await;
            assert!(ended.is_ok(), "subscriber stream for @{} stayed open", subscription.key());
        }
    }
}
