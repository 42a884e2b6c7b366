use std::time::Duration;

pub const DEFAULT_MESSAGE_COLOR: &str = "#00f2ea";
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Timing and presentation knobs for the relay core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Delay before reconnecting after upstream reports `Disconnected`.
    pub reconnect_delay: Duration,
    /// Backoff before retrying a failed connect attempt.
    pub connect_retry_delay: Duration,
    /// Minimum time between the starts of two connect attempts.
    pub min_connect_spacing: Duration,
    /// How long an entry with no subscribers survives before teardown.
    pub idle_grace_period: Duration,
    /// Frames queued per subscriber before further frames are dropped for it.
    pub subscriber_buffer: usize,
    /// Fixed `color` field of chat frames.
    pub message_color: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            connect_retry_delay: Duration::from_secs(15),
            min_connect_spacing: Duration::from_secs(5),
            idle_grace_period: Duration::from_secs(60),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            message_color: DEFAULT_MESSAGE_COLOR.to_string(),
        }
    }
}
