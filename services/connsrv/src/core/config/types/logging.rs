//! Logging configuration types

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (`RUST_LOG` takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console logging
    #[serde(default = "default_true")]
    pub console: bool,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Log file path, rolled daily
    #[serde(default)]
    pub file: Option<String>,

    /// ANSI colors on the console
    #[serde(default = "default_true")]
    pub ansi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: true,
            format: LogFormat::default(),
            file: None,
            ansi: true,
        }
    }
}
