//! Transport layer traits
//!
//! A transport owns one physical connection (a device socket or a shared
//! broker session) and moves [`WireFrame`]s over it. Reconnection policy,
//! write coalescing and lifecycle events live in the transport client.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use fb_comlink::WireFrame;
use serde::Serialize;
use thiserror::Error;

use crate::error::ConnSrvError;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection attempt failed (refused, unreachable)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Established connection dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Frame kind the transport cannot carry
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// Endpoint configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Peer rejected the session (auth, handshake); retrying will not help
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl TransportError {
    /// Stop retrying this endpoint
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolError(_) | Self::ConfigError(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::AddrNotAvailable => {
                Self::ConnectionFailed(err.to_string())
            },
            _ => Self::ConnectionLost(err.to_string()),
        }
    }
}

impl From<TransportError> for ConnSrvError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ProtocolError(msg) => ConnSrvError::ProtocolFatal(msg),
            TransportError::ConfigError(msg) => ConnSrvError::ConfigError(msg),
            other => ConnSrvError::ConnectionError(other.to_string()),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub last_connection: Option<SystemTime>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
        self.last_connection = Some(SystemTime::now());
    }

    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
    }

    pub fn record_disconnection(&mut self) {
        self.disconnections += 1;
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }
}

/// Core transport trait
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Transport type identifier
    fn transport_type(&self) -> &str;

    /// Remote endpoint, for logs
    fn endpoint(&self) -> &str;

    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release the connection. Safe to call when already disconnected.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send one frame, returning the payload size
    async fn send(&mut self, frame: &WireFrame) -> Result<usize, TransportError>;

    /// Wait for the next inbound frame.
    ///
    /// Must be cancel-safe: the client drops this future when a command,
    /// timer or cancellation wins the race, and no data may be lost.
    async fn recv(&mut self) -> Result<WireFrame, TransportError>;

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from(refused);
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert!(!err.is_fatal());

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(TransportError::from(reset), TransportError::ConnectionLost(_)));

        assert!(TransportError::ProtocolError("bad credentials".into()).is_fatal());
        assert!(ConnSrvError::from(TransportError::ProtocolError("x".into())).is_fatal());
    }
}
