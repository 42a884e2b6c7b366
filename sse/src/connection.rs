use crate::key::BroadcasterKey;
use crate::message::Event;
use log::*;
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};

/// Sinks are bounded so a stalled client cannot grow memory without limit.
pub type SubscriberSender = Sender<Event>;
pub type SubscriberReceiver = Receiver<Event>;

/// Unique identifier for an attached subscriber (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// One downstream stream attached to a broadcaster session.
#[derive(Debug)]
pub struct Subscriber {
    sender: SubscriberSender,
    alive: bool,
}

impl Subscriber {
    fn new(sender: SubscriberSender) -> Self {
        Self {
            sender,
            alive: true,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Writes one frame without waiting. A full buffer drops the frame for
    /// this subscriber only. A closed stream flips the liveness flag; the
    /// subscriber stays registered until its stream is dropped.
    fn deliver(&mut self, event: Event) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                self.alive = false;
                false
            }
        }
    }
}

/// The subscriber sinks of one broadcaster session. Not synchronized on its
/// own; the owning session guards it with its state lock.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: SubscriberSender) -> SubscriberId {
        let subscriber_id = SubscriberId::new();
        self.subscribers
            .insert(subscriber_id.clone(), Subscriber::new(sender));
        subscriber_id
    }

    /// Returns `false` when the subscriber was already gone.
    pub fn unregister(&mut self, subscriber_id: &SubscriberId) -> bool {
        self.subscribers.remove(subscriber_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, subscriber_id: &SubscriberId) -> bool {
        self.subscribers.contains_key(subscriber_id)
    }

    /// Delivers `event` to every live subscriber and returns how many
    /// accepted it. A failing subscriber never stops delivery to the rest.
    pub fn broadcast(&mut self, key: &BroadcasterKey, event: &Event) -> usize {
        let mut delivered = 0;
        for (subscriber_id, subscriber) in self.subscribers.iter_mut() {
            if !subscriber.is_alive() {
                continue;
            }
            if subscriber.deliver(event.clone()) {
                delivered += 1;
            } else if subscriber.is_alive() {
                warn!(
                    "Subscriber {} of @{} is not keeping up, dropped a frame",
                    subscriber_id.as_str(),
                    key
                );
            } else {
                warn!(
                    "Failed to write to subscriber {} of @{}. It will be removed when its stream closes.",
                    subscriber_id.as_str(),
                    key
                );
            }
        }
        delivered
    }

    /// Drops every sink, which ends the corresponding downstream streams.
    pub fn close_all(&mut self) -> usize {
        let closed = self.subscribers.len();
        self.subscribers.clear();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key() -> BroadcasterKey {
        BroadcasterKey::parse("abc").unwrap()
    }

    #[test]
    fn test_register_and_unregister_exactly_once() {
        let mut set = SubscriberSet::new();
        let (tx, _rx) = mpsc::channel(8);

        let id = set.register(tx);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&id));

        assert!(set.unregister(&id));
        assert!(!set.unregister(&id));
        assert!(set.is_empty());
    }

    #[test]
    fn test_broadcast_isolates_failing_subscriber() {
        let mut set = SubscriberSet::new();
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        let (tx_dead, rx_dead) = mpsc::channel(8);
        set.register(tx_ok);
        let dead_id = set.register(tx_dead);
        drop(rx_dead);

        let event = Event::chat("u1", "hi", "#00f2ea");
        assert_eq!(set.broadcast(&key(), &event), 1);
        assert_eq!(rx_ok.try_recv().unwrap(), event);

        // The failing sink is flagged, not removed
        assert_eq!(set.len(), 2);
        assert!(!set.subscribers[&dead_id].is_alive());

        let second = Event::chat("u2", "again", "#00f2ea");
        assert_eq!(set.broadcast(&key(), &second), 1);
        assert_eq!(rx_ok.try_recv().unwrap(), second);
    }

    #[test]
    fn test_full_buffer_drops_frames_for_that_subscriber_only() {
        let mut set = SubscriberSet::new();
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = mpsc::channel(8);
        let slow_id = set.register(tx_slow);
        set.register(tx_fast);

        let first = Event::chat("u1", "one", "#00f2ea");
        let second = Event::chat("u2", "two", "#00f2ea");
        assert_eq!(set.broadcast(&key(), &first), 2);
        assert_eq!(set.broadcast(&key(), &second), 1);

        // A full sink is still alive and catches up once drained
        assert!(set.subscribers[&slow_id].is_alive());
        assert_eq!(rx_slow.try_recv().unwrap(), first);
        assert!(rx_slow.try_recv().is_err());

        let third = Event::chat("u3", "three", "#00f2ea");
        assert_eq!(set.broadcast(&key(), &third), 2);
        assert_eq!(rx_slow.try_recv().unwrap(), third);

        assert_eq!(rx_fast.try_recv().unwrap(), first);
        assert_eq!(rx_fast.try_recv().unwrap(), second);
        assert_eq!(rx_fast.try_recv().unwrap(), third);
    }

    #[test]
    fn test_close_all_ends_streams() {
        let mut set = SubscriberSet::new();
        let (tx, mut rx) = mpsc::channel(8);
        set.register(tx);

        assert_eq!(set.close_all(), 1);
        assert!(set.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
