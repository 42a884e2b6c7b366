//! Upstream chat event contract for the relay.
//!
//! This crate describes the capability the relay consumes from an upstream
//! live-chat client, without knowing anything about its wire protocol.
//!
//! # Architecture
//!
//! - **UpstreamEvent**: Enum of everything an upstream session can report
//! - **UpstreamSession**: `connect` / `disconnect` on one broadcaster's feed
//! - **UpstreamConnector**: Opens an `UpstreamSession` for a broadcaster and
//!   wires its events onto a channel owned by the caller
//! - **EventHandler**: Trait for consuming events delivered from that channel
//!
//! Events travel over an unbounded channel rather than callbacks so that the
//! consumer decides in which task, and under which lock, they are handled.
//!
//! This crate has no dependencies on other workspace crates.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Error, UpstreamErrorKind};

/// Events reported by an upstream live-chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A chat comment posted in the broadcaster's live room.
    Chat {
        /// Public handle of the viewer who posted the comment.
        unique_id: String,
        /// Comment text as received from upstream.
        comment: String,
    },
    /// The upstream connection was lost or closed by the remote end.
    Disconnected,
    /// A non-fatal protocol or transport error. The session stays up unless a
    /// `Disconnected` follows.
    Error { message: String },
}

pub type UpstreamEventSender = mpsc::UnboundedSender<UpstreamEvent>;
pub type UpstreamEventReceiver = mpsc::UnboundedReceiver<UpstreamEvent>;

/// Creates the channel an upstream session reports its events on.
pub fn event_channel() -> (UpstreamEventSender, UpstreamEventReceiver) {
    mpsc::unbounded_channel()
}

/// One live connection to a single broadcaster's chat feed.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Performs the upstream handshake. Calling it again after a
    /// `Disconnected` event re-establishes the feed.
    async fn connect(&self) -> Result<(), Error>;

    /// Closes the feed. No `Disconnected` event is required afterwards.
    async fn disconnect(&self);
}

/// Opens upstream sessions. Implementations must not perform any I/O in
/// `open`; the relay calls `connect` when it is ready.
pub trait UpstreamConnector: Send + Sync {
    fn open(&self, broadcaster: &str, events: UpstreamEventSender) -> Arc<dyn UpstreamSession>;
}

/// Trait for handling upstream events.
/// Implementations receive events one at a time, in arrival order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &UpstreamEvent);
}
