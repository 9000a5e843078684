//! Tracing Infrastructure
//!
//! Structured logging for the acquisition service on `tracing` and
//! `tracing-subscriber`. Events carry fields such as `phase`, `channel` and
//! `repeat`; the output format (pretty, compact or JSON) and level come from
//! the `[application]` settings, and `RUST_LOG` wins over the configured level.
//!
//! # Example
//! ```no_run
//! use gas_mux_daq::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (development)
    Pretty,
    /// Single-line, no colors (console on the device)
    Compact,
    /// One JSON object per event (log shipping)
    Json,
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
}

impl LoggingConfig {
    /// Resolve the `[application]` log settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.application.log_level)?,
            format: parse_format(&settings.application.log_format)?,
        })
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer().with_thread_names(true);
        match self.format {
            OutputFormat::Pretty => base.pretty().boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().boxed(),
        }
    }
}

/// Initialize tracing from the application settings.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(&LoggingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// A subscriber that is already installed (tests, embedding) is kept and the
/// call succeeds.
pub fn init(config: &LoggingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    tracing_subscriber::registry()
        .with(config.layer().with_filter(filter))
        .try_init()
        .or_else(|e| {
            if tracing::dispatcher::has_been_set() {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}

fn parse_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        other => Err(format!("Invalid log format '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_case_insensitive() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("INFO"), Ok(Level::INFO));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn config_from_settings() {
        let mut settings = Settings::default();
        settings.application.log_level = "debug".to_string();
        settings.application.log_format = "json".to_string();

        let config = LoggingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);

        settings.application.log_format = "xml".to_string();
        assert!(LoggingConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn init_is_idempotent() {
        let mut settings = Settings::default();
        settings.application.log_level = "warn".to_string();
        settings.application.log_format = "compact".to_string();
        assert!(init_from_settings(&settings).is_ok());
        assert!(init_from_settings(&settings).is_ok());
    }
}
