use crate::key::BroadcasterKey;
use axum::response::sse::Event as SseEvent;
use log::*;
use serde::{Deserialize, Serialize};

const CONNECTED: &str = "connected";

/// Normalized chat record delivered to every subscriber of a broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub message: String,
    pub color: String,
    /// Epoch milliseconds at which the relay received the comment.
    pub timestamp: i64,
}

/// Frames written to a subscriber stream, each as one `data:` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Event {
    /// Sent once, right after a subscriber attaches.
    Connected { system: String, user: String },
    Chat(ChatMessage),
}

impl Event {
    pub fn connected(key: &BroadcasterKey) -> Self {
        Event::Connected {
            system: CONNECTED.to_string(),
            user: key.to_string(),
        }
    }

    pub fn chat(unique_id: &str, comment: &str, color: &str) -> Self {
        Event::Chat(ChatMessage {
            user: unique_id.to_string(),
            message: comment.to_string(),
            color: color.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Renders the frame as an unnamed SSE event carrying the JSON payload.
    pub fn to_sse_event(&self) -> Option<SseEvent> {
        match serde_json::to_string(self) {
            Ok(json) => Some(SseEvent::default().data(json)),
            Err(e) => {
                error!("Failed to serialize SSE event: {e}");
                None
            }
        }
    }
}
