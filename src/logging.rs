//! Tracing setup for the CLI and embedders. Logs go to stderr so stdout stays
//! clean for command output.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_JSON_ENV: &str = "BEEINBOX_LOG_JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `BEEINBOX_LOG_JSON=1` selects JSON lines.
    pub fn from_env() -> Self {
        match std::env::var(LOG_JSON_ENV) {
            Ok(value) if value.trim() == "1" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn init_logging() {
    init_logging_with(LogFormat::from_env());
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging_with(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(?format, "logging initialized");
    }
}
