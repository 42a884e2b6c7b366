//! Connection pool and fan-out core of the chat relay.
//!
//! This crate multiplexes one upstream live-chat session per broadcaster onto
//! any number of downstream Server-Sent Events (SSE) subscribers.
//!
//! # Architecture
//!
//! - **One upstream session per broadcaster**: Subscribers of the same
//!   broadcaster key share a single `BroadcasterSession`, created lazily by
//!   the `Manager` on first subscribe.
//! - **Per-key critical sections**: Each session guards its subscribers,
//!   connection state and timers with its own lock. Different broadcasters
//!   never contend with each other.
//! - **Message passing from upstream**: The upstream session reports chat,
//!   disconnect and error events over a channel; a per-session pump hands
//!   them to the session's `EventHandler` one at a time.
//! - **Cancellable timers**: A session holds at most one reconnect timer and
//!   one idle-teardown timer. Arming either one supersedes the previous.
//! - **Ephemeral messages**: Nothing is stored. A subscriber only sees
//!   comments that arrive while it is attached.
//!
//! # Message Flow
//!
//! 1. Client opens `/<broadcaster>/sse`
//! 2. The gateway calls `Manager::subscribe`, which normalizes the key and
//!    finds or creates the broadcaster session
//! 3. The session registers a subscriber sink, cancels any pending idle
//!    teardown and queues the confirmation frame
//! 4. Upstream chat events are fanned out to every sink of the session
//! 5. When the client goes away the `Subscription` is dropped, the sink is
//!    removed and, if it was the last one, the idle-teardown timer starts
//!
//! # Modules
//!
//! - `connection`: Subscriber sinks and the per-session `SubscriberSet`
//! - `key`: Broadcaster key normalization
//! - `manager`: The connection pool
//! - `message`: Frame types written to subscribers
//! - `session`: Broadcaster session entry, connect gating and timers
//! - `subscription`: The subscriber-side handle returned by `subscribe`

pub mod connection;
pub mod error;
pub mod key;
pub mod manager;
pub mod message;
pub mod session;
pub mod settings;
pub mod subscription;
mod upstream_event_handler;

pub use error::{Error, ErrorKind, InvalidKeyKind};
pub use key::BroadcasterKey;
pub use manager::Manager;
pub use session::{BroadcasterSession, ConnectOutcome, SessionStats, UpstreamState};
pub use settings::RelaySettings;
pub use subscription::Subscription;
