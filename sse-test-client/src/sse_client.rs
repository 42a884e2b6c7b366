use anyhow::Result;
use eventsource_client::{self as es, Client};
use futures_util::stream::StreamExt;
use log::*;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Value,
    pub received_at: Instant,
}

impl Frame {
    pub fn is_confirmation(&self) -> bool {
        self.data["system"] == "connected"
    }

    pub fn is_chat(&self) -> bool {
        self.data.get("message").is_some()
    }

    pub fn user(&self) -> &str {
        self.data["user"].as_str().unwrap_or_default()
    }
}

pub struct Connection {
    pub label: String,
    frame_rx: mpsc::UnboundedReceiver<Frame>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Opens `<base_url>/<broadcaster>/sse` and starts collecting frames.
    pub async fn establish(base_url: &str, broadcaster: &str, label: String) -> Result<Self> {
        let url = format!("{}/{}/sse", base_url.trim_end_matches('/'), broadcaster);
        let (tx, rx) = mpsc::unbounded_channel();

        let client = es::ClientBuilder::for_url(&url)?
            .header("Accept", "text/event-stream")?
            .build();

        let stream_label = label.clone();
        let handle = tokio::spawn(async move {
            let mut stream = client.stream();

            loop {
                match stream.next().await {
                    Some(Ok(es::SSE::Event(event))) => match serde_json::from_str(&event.data) {
                        Ok(data) => {
                            let frame = Frame {
                                data,
                                received_at: Instant::now(),
                            };
                            if tx.send(frame).is_err() {
                                debug!("SSE receiver dropped for {}", stream_label);
                                break;
                            }
                        }
                        Err(e) => warn!("Unparseable frame for {}: {}", stream_label, e),
                    },
                    Some(Ok(es::SSE::Comment(_))) => {
                        // Ignore comments (keep-alive)
                    }
                    Some(Err(e)) => {
                        warn!("SSE error for {}: {}", stream_label, e);
                    }
                    None => {
                        debug!("SSE stream ended for {}", stream_label);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            label,
            frame_rx: rx,
            _handle: handle,
        })
    }

    /// Waits for the first frame matching `predicate`, skipping the others.
    pub async fn wait_for_frame<F>(&mut self, what: &str, timeout: Duration, predicate: F) -> Result<Frame>
    where
        F: Fn(&Frame) -> bool,
    {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("Timeout waiting for {} on {}", what, self.label);
            }

            match tokio::time::timeout(remaining, self.frame_rx.recv()).await {
                Ok(Some(frame)) if predicate(&frame) => return Ok(frame),
                Ok(Some(_)) => continue,
                Ok(None) => anyhow::bail!("SSE connection closed for {}", self.label),
                Err(_) => anyhow::bail!("Timeout waiting for {} on {}", what, self.label),
            }
        }
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frame_rx.recv().await
    }
}
