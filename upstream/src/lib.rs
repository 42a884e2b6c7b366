//! HTTP event-stream implementation of the upstream capability contract.
//!
//! `EventStreamConnector` opens one `EventStreamSession` per broadcaster. A
//! session connects by issuing `GET <feed url>` with
//! `Accept: text/event-stream` and, once the feed answers, decodes its body
//! into `UpstreamEvent`s on a background reader task.
//!
//! Feed records are expected to look like:
//!
//! ```text
//! event: chat
//! data: {"uniqueId":"someone","comment":"hello"}
//! ```
//!
//! Unnamed and `message` events are treated as chat. An `error` event is
//! forwarded as `UpstreamEvent::Error` with its data as the message. The end
//! of the body is reported as `UpstreamEvent::Disconnected`.

mod connector;
mod session;

pub use connector::{EventStreamConnector, BROADCASTER_PLACEHOLDER};
pub use session::EventStreamSession;
