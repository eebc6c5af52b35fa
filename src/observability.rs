//! Logging setup
//!
//! All settings come from the environment, with the usual names:
//! `RUST_LOG` for the filter and `SYNC_LOG_FORMAT` (`text` or `json`) for the
//! output shape. JSON output puts run reports on one line each, which is what
//! log shippers want.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {:?} (expected text or json)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `bucket_sync=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Override fields from `lookup`; unparseable values are ignored
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(filter) = lookup("RUST_LOG").filter(|f| !f.trim().is_empty()) {
            self.filter = filter;
        }
        if let Some(format) = lookup("SYNC_LOG_FORMAT").and_then(|f| f.parse().ok()) {
            self.format = format;
        }
    }
}

/// Install the global subscriber
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(&config.filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_apply_vars() {
        let vars: HashMap<&str, &str> =
            [("RUST_LOG", "bucket_sync=debug"), ("SYNC_LOG_FORMAT", "json")].into();
        let mut config = LogConfig::default();
        config.apply_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.filter, "bucket_sync=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_bad_format_keeps_default() {
        let mut config = LogConfig::default();
        config.apply_vars(|name| (name == "SYNC_LOG_FORMAT").then(|| "yaml".to_string()));
        assert_eq!(config, LogConfig::default());
    }
}
