//! Error handling for the connector service
//!
//! Transient failures (`ConnectionError`, `IoError`) are retried by the
//! transport client; `ProtocolFatal` and `ConfigError` take the affected
//! device out of service until the connector is reconfigured.

use fb_comlink::ComlinkError;
use thiserror::Error;

/// Connector service error type
#[derive(Error, Debug, Clone)]
pub enum ConnSrvError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transient connection failure (timeout, reset, refused)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Protocol failure that retrying cannot fix (auth rejected, bad handshake)
    #[error("Fatal protocol error: {0}")]
    ProtocolFatal(String),

    /// Wire codec error
    #[error("Codec error: {0}")]
    Codec(#[from] ComlinkError),

    /// State store or publisher failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Operation not allowed in the current lifecycle state
    #[error("State error: {0}")]
    StateError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the connector service
pub type Result<T> = std::result::Result<T, ConnSrvError>;

impl ConnSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        ConnSrvError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ConnSrvError::ConnectionError(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ConnSrvError::ProtocolFatal(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        ConnSrvError::StorageError(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        ConnSrvError::StateError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ConnSrvError::IoError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ConnSrvError::InternalError(msg.into())
    }

    /// Worth retrying after a backoff delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::IoError(_))
    }

    /// Takes the endpoint out of service until reconfiguration
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolFatal(_) | Self::ConfigError(_))
    }
}

impl From<std::io::Error> for ConnSrvError {
    fn from(err: std::io::Error) -> Self {
        ConnSrvError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ConnSrvError {
    fn from(err: serde_json::Error) -> Self {
        ConnSrvError::InternalError(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for ConnSrvError {
    fn from(err: serde_yaml::Error) -> Self {
        ConnSrvError::ConfigError(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for ConnSrvError {
    fn from(err: figment::Error) -> Self {
        ConnSrvError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| ConnSrvError::ConfigError(format!("{msg}: {e}")))
    }

    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| ConnSrvError::InternalError(format!("{msg}: {e}")))
    }
}
