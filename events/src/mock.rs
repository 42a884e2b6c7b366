//! Scripted in-memory upstream for tests.
//!
//! `MockConnector` records every session it opens so tests can assert how many
//! upstream connections exist per broadcaster, and `MockUpstream` lets a test
//! play the role of the remote chat service.

use crate::{
    Error, UpstreamConnector, UpstreamErrorKind, UpstreamEvent, UpstreamEventSender,
    UpstreamSession,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a scripted `connect` stays in flight after emitting its events.
const CONNECT_LATENCY: Duration = Duration::from_millis(5);

#[derive(Default)]
pub struct MockConnector {
    opened: DashMap<String, Vec<Arc<MockUpstream>>>,
    initial_failures: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session opened from now on fails its first `count` connects.
    pub fn fail_first_connects(&self, count: usize) {
        self.initial_failures.store(count, Ordering::SeqCst);
    }

    /// Number of upstream sessions ever opened for `broadcaster`.
    pub fn open_count(&self, broadcaster: &str) -> usize {
        self.opened.get(broadcaster).map_or(0, |sessions| sessions.len())
    }

    /// Total number of upstream sessions opened across all broadcasters.
    pub fn total_opened(&self) -> usize {
        self.opened.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of opened sessions still holding a live connection.
    pub fn connected_count(&self) -> usize {
        self.opened
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|upstream| upstream.is_connected())
            .count()
    }

    /// The most recently opened session for `broadcaster`.
    pub fn latest(&self, broadcaster: &str) -> Option<Arc<MockUpstream>> {
        self.opened
            .get(broadcaster)
            .and_then(|sessions| sessions.last().cloned())
    }
}

impl UpstreamConnector for MockConnector {
    fn open(&self, broadcaster: &str, events: UpstreamEventSender) -> Arc<dyn UpstreamSession> {
        let upstream = Arc::new(MockUpstream::new(broadcaster.to_string(), events));
        upstream.fail_next_connects(self.initial_failures.load(Ordering::SeqCst));
        self.opened
            .entry(broadcaster.to_string())
            .or_default()
            .push(Arc::clone(&upstream));
        upstream
    }
}

pub struct MockUpstream {
    broadcaster: String,
    events: UpstreamEventSender,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    connected: AtomicBool,
    during_next_connect: Mutex<Vec<UpstreamEvent>>,
}

impl MockUpstream {
    pub fn new(broadcaster: String, events: UpstreamEventSender) -> Self {
        Self {
            broadcaster,
            events,
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            during_next_connect: Mutex::new(Vec::new()),
        }
    }

    pub fn broadcaster(&self) -> &str {
        &self.broadcaster
    }

    /// Makes the next `count` calls to `connect` fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Queues `event` to be emitted while the next `connect` is still in
    /// flight, before it reports its result.
    pub fn emit_on_next_connect(&self, event: UpstreamEvent) {
        if let Ok(mut pending) = self.during_next_connect.lock() {
            pending.push(event);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn emit_chat(&self, unique_id: &str, comment: &str) {
        self.emit(UpstreamEvent::Chat {
            unique_id: unique_id.to_string(),
            comment: comment.to_string(),
        });
    }

    /// Simulates the remote end dropping the connection.
    pub fn emit_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(UpstreamEvent::Disconnected);
    }

    pub fn emit_error(&self, message: &str) {
        self.emit(UpstreamEvent::Error {
            message: message.to_string(),
        });
    }

    fn emit(&self, event: UpstreamEvent) {
        // The receiving side is gone once the relay tore the session down.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl UpstreamSession for MockUpstream {
    async fn connect(&self) -> Result<(), Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let during_connect = self
            .during_next_connect
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default();
        if !during_connect.is_empty() {
            for event in during_connect {
                self.emit(event);
            }
            tokio::time::sleep(CONNECT_LATENCY).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(Error::with_source(
                UpstreamErrorKind::Connect,
                format!("scripted connect failure for {}", self.broadcaster),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}
