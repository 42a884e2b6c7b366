use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP stack crates whose records only show up at `TRACE`.
const FILTERED_MODULES: &[&str] = &["hyper", "tower", "axum", "reqwest", "tracing"];

pub struct Logger {}

impl Logger {
    /// Installs the terminal logger at the configured level. Fails if a
    /// global logger is already set.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let level = config.log_level_filter;
        TermLogger::init(
            level,
            Self::build_log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }

    fn filters_dependencies(level: LevelFilter) -> bool {
        level < LevelFilter::Trace
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if Self::filters_dependencies(level) {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_crates_are_never_filtered() {
        for module in ["chat_relay", "events", "service", "sse", "upstream", "web"] {
            assert!(
                !FILTERED_MODULES.iter().any(|filtered| module.starts_with(filtered)),
                "{module} would be silenced"
            );
        }
    }

    #[test]
    fn test_only_trace_shows_http_stack_records() {
        assert!(!Logger::filters_dependencies(LevelFilter::Trace));

        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            assert!(Logger::filters_dependencies(level), "{level} lets hyper through");
        }
    }

    #[test]
    fn test_log_config_builds_for_every_level() {
        for level in LevelFilter::iter() {
            let _config = Logger::build_log_config(level);
        }
    }
}
