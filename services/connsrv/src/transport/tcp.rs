//! TCP transport
//!
//! Carries Modbus ADUs. Inbound bytes are split into frames with the framing's
//! length rules; bytes that cannot start a frame are handed to the codec as
//! one chunk so it can report them as malformed.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fb_comlink::modbus::ModbusFraming;
use fb_comlink::WireFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::traits::{Transport, TransportError, TransportStats};

/// Largest Modbus ADU (MBAP header + PDU) plus slack
const MAX_BUFFERED: usize = 512;

#[derive(Debug)]
pub struct TcpTransport {
    addr: String,
    framing: ModbusFraming,
    connect_timeout: Duration,
    no_delay: bool,
    stream: Option<TcpStream>,
    buffer: BytesMut,
    stats: TransportStats,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, framing: ModbusFraming, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            framing,
            connect_timeout,
            no_delay: true,
            stream: None,
            buffer: BytesMut::with_capacity(MAX_BUFFERED),
            stats: TransportStats::new(),
        }
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    fn take_frame(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        match self.framing.response_len(&self.buffer) {
            Ok(Some(len)) if self.buffer.len() >= len => Some(self.buffer.split_to(len).freeze()),
            Ok(_) if self.buffer.len() < MAX_BUFFERED => None,
            Ok(_) => {
                warn!("{}: {} bytes without a complete frame, flushing", self.addr, self.buffer.len());
                Some(self.buffer.split().freeze())
            },
            Err(e) => {
                debug!("{}: unframeable input ({}), flushing", self.addr, e);
                Some(self.buffer.split().freeze())
            },
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> &str {
        "tcp"
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Connecting to TCP endpoint: {}", self.addr);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.record_failed_connection();
                return Err(TransportError::ConnectionFailed(format!("{}: {e}", self.addr)));
            },
            Err(_) => {
                self.stats.record_failed_connection();
                return Err(TransportError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    self.addr, self.connect_timeout
                )));
            },
        };
        if let Err(e) = stream.set_nodelay(self.no_delay) {
            warn!("Failed to set TCP_NODELAY: {e}");
        }

        self.buffer.clear();
        self.stream = Some(stream);
        self.stats.record_successful_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("{}: shutdown: {e}", self.addr);
            }
            self.stats.record_disconnection();
        }
        self.buffer.clear();
        Ok(())
    }

    async fn send(&mut self, frame: &WireFrame) -> Result<usize, TransportError> {
        let WireFrame::Binary(bytes) = frame else {
            return Err(TransportError::UnsupportedFrame(format!(
                "TCP carries binary frames, got {frame}"
            )));
        };
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::SendFailed("not connected".to_string()))?;
        if let Err(e) = stream.write_all(bytes).await {
            self.stream = None;
            self.stats.record_disconnection();
            return Err(TransportError::ConnectionLost(e.to_string()));
        }
        self.stats.record_sent(bytes.len());
        Ok(bytes.len())
    }

    async fn recv(&mut self) -> Result<WireFrame, TransportError> {
        loop {
            if let Some(frame) = self.take_frame() {
                self.stats.record_received(frame.len());
                return Ok(WireFrame::Binary(frame));
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::ReceiveFailed("not connected".to_string()))?;
            match stream.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    self.stream = None;
                    self.stats.record_disconnection();
                    return Err(TransportError::ConnectionLost(format!("{} closed the connection", self.addr)));
                },
                Ok(_) => {},
                Err(e) => {
                    self.stream = None;
                    self.stats.record_disconnection();
                    return Err(e.into());
                },
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_frames_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            // two MBAP responses in one segment
            let mut reply = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x01];
            reply.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x00]);
            socket.write_all(&reply).await.unwrap();
        });

        let mut transport = TcpTransport::new(addr, ModbusFraming::Tcp, Duration::from_secs(1));
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let request = Bytes::from_static(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(transport.send(&WireFrame::Binary(request)).await.unwrap(), 12);

        let first = transport.recv().await.unwrap();
        let second = transport.recv().await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(second, WireFrame::Binary(Bytes::from_static(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x00])));

        server.await.unwrap();
        assert!(matches!(transport.recv().await, Err(TransportError::ConnectionLost(_))));
        assert!(!transport.is_connected());
        assert_eq!(transport.stats().frames_received, 2);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut transport = TcpTransport::new(addr, ModbusFraming::Tcp, Duration::from_secs(1));
        let err = transport.connect().await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(transport.stats().failed_connections, 1);
    }

    #[tokio::test]
    async fn test_rejects_text_frames() {
        let mut transport = TcpTransport::new("127.0.0.1:502", ModbusFraming::Rtu, Duration::from_secs(1));
        let err = transport.send(&WireFrame::Text("{}".into())).await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedFrame(_)));
    }
}
