use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use sse::RelaySettings;
use std::time::Duration;

/// Value of `allowed_origins` that selects the open CORS policy.
pub const ANY_ORIGIN: &str = "*";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that are allowed to receive server responses.
    /// A single `*` allows any origin.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 8080)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,

    /// URL of a broadcaster's upstream chat feed. `{broadcaster}` is replaced
    /// with the normalized broadcaster key.
    #[arg(
        short,
        long,
        env,
        default_value = "http://127.0.0.1:9000/{broadcaster}/events"
    )]
    upstream_url_template: String,

    /// Seconds allowed for the upstream handshake
    #[arg(long, env, default_value_t = 10)]
    pub upstream_connect_timeout_secs: u64,

    /// Seconds to wait before reconnecting after the upstream dropped
    #[arg(long, env, default_value_t = 10)]
    pub reconnect_delay_secs: u64,

    /// Seconds to wait before retrying a failed upstream connect
    #[arg(long, env, default_value_t = 15)]
    pub connect_retry_delay_secs: u64,

    /// Minimum seconds between the starts of two upstream connect attempts
    #[arg(long, env, default_value_t = 5)]
    pub min_connect_spacing_secs: u64,

    /// Seconds a broadcaster without subscribers stays connected upstream
    #[arg(long, env, default_value_t = 60)]
    pub idle_grace_period_secs: u64,

    /// Frames buffered per subscriber before frames are dropped for a slow client
    #[arg(long, env, default_value_t = sse::settings::DEFAULT_SUBSCRIBER_BUFFER)]
    pub subscriber_buffer: usize,

    /// Interval in seconds of SSE keep-alive comments
    #[arg(long, env, default_value_t = 15)]
    pub keep_alive_secs: u64,

    /// The `color` attached to every relayed chat message
    #[arg(long, env, default_value = sse::settings::DEFAULT_MESSAGE_COLOR)]
    pub message_color: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn upstream_url_template(&self) -> &str {
        &self.upstream_url_template
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// True when any origin may receive responses.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.len() == 1 && self.allowed_origins[0].trim() == ANY_ORIGIN
    }

    /// The timing and presentation knobs of the connection pool.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            connect_retry_delay: Duration::from_secs(self.connect_retry_delay_secs),
            min_connect_spacing: Duration::from_secs(self.min_connect_spacing_secs),
            idle_grace_period: Duration::from_secs(self.idle_grace_period_secs),
            subscriber_buffer: self.subscriber_buffer,
            message_color: self.message_color.clone(),
        }
    }
}
