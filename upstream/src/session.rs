use async_trait::async_trait;
use eventsource_stream::{Event as FeedEvent, Eventsource};
use events::{Error, UpstreamErrorKind, UpstreamEvent, UpstreamEventSender, UpstreamSession};
use futures_util::StreamExt;
use log::*;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A chat record as it appears in the feed's `data:` field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    unique_id: String,
    comment: String,
}

/// One broadcaster's chat feed.
pub struct EventStreamSession {
    broadcaster: String,
    url: String,
    client: reqwest::Client,
    connect_timeout: Duration,
    events: UpstreamEventSender,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamSession {
    pub(crate) fn new(
        broadcaster: String,
        url: String,
        client: reqwest::Client,
        connect_timeout: Duration,
        events: UpstreamEventSender,
    ) -> Self {
        Self {
            broadcaster,
            url,
            client,
            connect_timeout,
            events,
            reader: Mutex::new(None),
        }
    }

    async fn open_feed(&self) -> Result<reqwest::Response, Error> {
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send();

        let response = match tokio::time::timeout(self.connect_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => {
                return Err(Error::with_source(UpstreamErrorKind::Timeout, e));
            }
            Ok(Err(e)) => return Err(Error::with_source(UpstreamErrorKind::Connect, e)),
            Err(_) => {
                return Err(Error::with_source(
                    UpstreamErrorKind::Timeout,
                    format!("no answer from {} within {:?}", self.url, self.connect_timeout),
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::with_source(
                UpstreamErrorKind::Connect,
                format!("{} answered {status}", self.url),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl UpstreamSession for EventStreamSession {
    async fn connect(&self) -> Result<(), Error> {
        let response = self.open_feed().await?;
        debug!("Opened chat feed for @{} at {}", self.broadcaster, self.url);

        let reader = tokio::spawn(read_events(
            self.broadcaster.clone(),
            response,
            self.events.clone(),
        ));
        if let Some(previous) = self.reader.lock().await.replace(reader) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            debug!("Closed chat feed for @{}", self.broadcaster);
        }
    }
}

/// Forwards decoded feed records until the body ends or fails, then reports
/// the disconnect.
async fn read_events(broadcaster: String, response: reqwest::Response, events: UpstreamEventSender) {
    let mut feed = response.bytes_stream().eventsource();

    while let Some(record) = feed.next().await {
        match record {
            Ok(record) => {
                let Some(event) = decode(&record) else {
                    continue;
                };
                if events.send(event).is_err() {
                    // Nobody owns this session anymore
                    return;
                }
            }
            Err(e) => {
                warn!("Chat feed for @{broadcaster} failed: {e}");
                break;
            }
        }
    }

    debug!("Chat feed for @{broadcaster} ended");
    let _ = events.send(UpstreamEvent::Disconnected);
}

fn decode(record: &FeedEvent) -> Option<UpstreamEvent> {
    match record.event.as_str() {
        "" | "message" | "chat" => match serde_json::from_str::<ChatPayload>(&record.data) {
            Ok(chat) => Some(UpstreamEvent::Chat {
                unique_id: chat.unique_id,
                comment: chat.comment,
            }),
            Err(e) => Some(UpstreamEvent::Error {
                message: Error::with_source(UpstreamErrorKind::Decode, e).to_string(),
            }),
        },
        "error" => Some(UpstreamEvent::Error {
            message: record.data.clone(),
        }),
        other => {
            trace!("Ignoring feed record of type {other:?}");
            None
        }
    }
}
