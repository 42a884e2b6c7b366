use crate::session::BroadcasterSession;
use async_trait::async_trait;
use events::{EventHandler, UpstreamEvent};
use log::*;

/// Routes upstream events into the session that owns the upstream feed.
///
/// - `Chat` is converted into a chat frame and fanned out to all subscribers
/// - `Disconnected` schedules a reconnect, or removes an unwatched entry
/// - `Error` is logged only; it does not change the session state
#[async_trait]
impl EventHandler for BroadcasterSession {
    async fn handle(&self, event: &UpstreamEvent) {
        match event {
            UpstreamEvent::Chat { unique_id, comment } => {
                self.fan_out(unique_id, comment).await;
            }

            UpstreamEvent::Disconnected => {
                self.handle_disconnected().await;
            }

            UpstreamEvent::Error { message } => {
                warn!("⚠️ Upstream error for @{}: {}", self.key(), message);
            }
        }
    }
}
