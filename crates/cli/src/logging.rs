//! Structured logging setup for the CLI
//!
//! Logs go to stderr so `status --json` and `plan` output stays parseable.

use std::io;
use strata_migrate::{LogConfig, LogFormat};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info" or "strata_migrate=debug,sqlx=warn")
    pub env_filter: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Multi-line human readable output
    pub pretty_print: bool,
    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: "info,sqlx=warn".to_string(),
            json_format: false,
            pretty_print: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// JSON lines for log shippers
    pub fn production() -> Self {
        Self {
            env_filter: "strata_migrate=info,strata=info,sqlx=warn".to_string(),
            json_format: true,
            pretty_print: false,
            include_location: false,
        }
    }

    /// Verbose pretty output with locations
    pub fn development() -> Self {
        Self {
            env_filter: "strata_migrate=debug,strata=debug,sqlx=info".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: true,
        }
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = filter.into();
        self
    }
}

impl From<&LogConfig> for LoggingConfig {
    fn from(config: &LogConfig) -> Self {
        let base = match config.format {
            LogFormat::Text => Self::default(),
            LogFormat::Json => Self::production(),
            LogFormat::Pretty => Self::development(),
        };
        base.with_env_filter(config.filter.clone())
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the configured filter
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.env_filter))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else if config.pretty_print {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_selects_preset() {
        let text = LoggingConfig::from(&LogConfig {
            filter: "debug".to_string(),
            format: LogFormat::Text,
        });
        assert!(!text.json_format);
        assert!(!text.pretty_print);
        assert_eq!(text.env_filter, "debug");

        let json = LoggingConfig::from(&LogConfig {
            filter: "warn".to_string(),
            format: LogFormat::Json,
        });
        assert!(json.json_format);
        assert_eq!(json.env_filter, "warn");

        let pretty = LoggingConfig::from(&LogConfig {
            filter: "strata=trace".to_string(),
            format: LogFormat::Pretty,
        });
        assert!(pretty.pretty_print);
        assert!(pretty.include_location);
        assert!(!pretty.json_format);
        assert_eq!(pretty.env_filter, "strata=trace");
    }

    #[test]
    fn test_presets() {
        assert!(LoggingConfig::production().json_format);
        assert!(LoggingConfig::development().include_location);
        assert!(!LoggingConfig::default().json_format);
        assert!(!LoggingConfig::default().pretty_print);
    }
}
