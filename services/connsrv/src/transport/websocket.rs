//! WebSocket transport (tokio-tungstenite)
//!
//! Used by JSON-RPC devices such as Shelly Gen2, which expose `ws://<host>/rpc`.

use std::time::Duration;

use async_trait::async_trait;
use fb_comlink::WireFrame;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::traits::{Transport, TransportError, TransportStats};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    stream: Option<WsStream>,
    stats: TransportStats,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            stream: None,
            stats: TransportStats::new(),
        }
    }

    /// `ws://<addr><path>`, or `endpoint` itself when it already is a URL
    pub fn url_for(endpoint: &str, path: &str) -> String {
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            endpoint.to_string()
        } else {
            format!("ws://{endpoint}{path}")
        }
    }

    fn lost(&mut self, reason: String) -> TransportError {
        self.stream = None;
        self.stats.record_disconnection();
        TransportError::ConnectionLost(reason)
    }
}

fn classify(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(e) => TransportError::ConnectionFailed(e.to_string()),
        tungstenite::Error::Http(response) => {
            TransportError::ProtocolError(format!("handshake rejected with HTTP {}", response.status()))
        },
        tungstenite::Error::Url(e) => TransportError::ConfigError(e.to_string()),
        other => TransportError::ProtocolError(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> &str {
        "web_socket"
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Connecting to WebSocket endpoint: {}", self.url);

        let result = match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(TransportError::Timeout(format!(
                "WebSocket handshake with {} took longer than {:?}",
                self.url, self.connect_timeout
            ))),
        };
        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.stats.record_successful_connection();
                Ok(())
            },
            Err(e) => {
                self.stats.record_failed_connection();
                Err(e)
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("{}: close: {e}", self.url);
            }
            self.stats.record_disconnection();
        }
        Ok(())
    }

    async fn send(&mut self, frame: &WireFrame) -> Result<usize, TransportError> {
        let message = match frame {
            WireFrame::Text(text) => Message::text(text.clone()),
            WireFrame::Binary(bytes) => Message::binary(bytes.clone()),
            WireFrame::Mqtt(_) => {
                return Err(TransportError::UnsupportedFrame(format!(
                    "WebSocket cannot carry {frame}"
                )))
            },
        };
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::SendFailed("not connected".to_string()))?;
        if let Err(e) = stream.send(message).await {
            return Err(self.lost(e.to_string()));
        }
        self.stats.record_sent(frame.len());
        Ok(frame.len())
    }

    async fn recv(&mut self) -> Result<WireFrame, TransportError> {
        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::ReceiveFailed("not connected".to_string()))?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.stats.record_received(text.len());
                    return Ok(WireFrame::Text(text.as_str().to_string()));
                },
                Some(Ok(Message::Binary(bytes))) => {
                    self.stats.record_received(bytes.len());
                    return Ok(WireFrame::Binary(bytes));
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                    return Err(self.lost(format!("{} closed the socket {reason}", self.url)));
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(self.lost(e.to_string())),
                None => return Err(self.lost(format!("{} stream ended", self.url))),
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

    #[test]
    fn test_url_for() {
        assert_eq!(WebSocketTransport::url_for("10.0.0.7:80", "/rpc"), "ws://10.0.0.7:80/rpc");
        assert_eq!(
            WebSocketTransport::url_for("wss://shelly.local/rpc", "/ignored"),
            "wss://shelly.local/rpc"
        );
    }

    #[tokio::test]
    async fn test_text_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let request = ws.next().await.unwrap().unwrap();
            assert!(request.is_text());
            ws.send(Message::text(r#"{"id":1,"src":"shellyplus1-a8032ab12345","result":{}}"#))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let url = WebSocketTransport::url_for(&addr, "/rpc");
        let mut transport = WebSocketTransport::new(url, Duration::from_secs(1));
        transport.connect().await.unwrap();
        transport
            .send(&WireFrame::Text(r#"{"id":1,"src":"connsrv","method":"Shelly.GetStatus"}"#.into()))
            .await
            .unwrap();

        let reply = transport.recv().await.unwrap();
        assert!(matches!(reply, WireFrame::Text(ref t) if t.contains("shellyplus1")));
        assert!(matches!(transport.recv().await, Err(TransportError::ConnectionLost(_))));
        assert!(!transport.is_connected());
        server.await.unwrap();
    }
}
