use crate::session::EventStreamSession;
use events::{Error, UpstreamConnector, UpstreamErrorKind, UpstreamEventSender, UpstreamSession};
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Substituted with the normalized broadcaster key in the feed URL template.
pub const BROADCASTER_PLACEHOLDER: &str = "{broadcaster}";

/// Opens HTTP event-stream sessions against a templated feed URL, e.g.
/// `http://chat-bridge:9000/{broadcaster}/events`.
pub struct EventStreamConnector {
    client: reqwest::Client,
    url_template: String,
    connect_timeout: Duration,
}

impl EventStreamConnector {
    pub fn new(url_template: impl Into<String>, connect_timeout: Duration) -> Result<Self, Error> {
        let url_template = url_template.into();
        if !url_template.contains(BROADCASTER_PLACEHOLDER) {
            return Err(Error::with_source(
                UpstreamErrorKind::Other("invalid upstream url template".to_string()),
                format!("{url_template:?} does not contain {BROADCASTER_PLACEHOLDER}"),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::with_source(
                    UpstreamErrorKind::Other("failed to build http client".to_string()),
                    e,
                )
            })?;

        info!("Upstream chat feeds will be read from {url_template}");
        Ok(Self {
            client,
            url_template,
            connect_timeout,
        })
    }

    pub fn url_for(&self, broadcaster: &str) -> String {
        self.url_template
            .replace(BROADCASTER_PLACEHOLDER, broadcaster)
    }
}

impl UpstreamConnector for EventStreamConnector {
    fn open(&self, broadcaster: &str, events: UpstreamEventSender) -> Arc<dyn UpstreamSession> {
        Arc::new(EventStreamSession::new(
            broadcaster.to_string(),
            self.url_for(broadcaster),
            self.client.clone(),
            self.connect_timeout,
            events,
        ))
    }
}
