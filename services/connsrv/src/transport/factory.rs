//! Transport factory
//!
//! Maps a connector's transport configuration to a concrete [`Transport`].

use std::time::Duration;

use crate::core::config::{ConnectorConfig, DeviceConfig, TransportConfig};
use crate::error::{ConnSrvError, Result};

use super::mqtt::MqttTransport;
use super::tcp::TcpTransport;
use super::traits::Transport;
use super::websocket::WebSocketTransport;

/// Builds transports for the orchestrator
pub trait TransportFactory: Send + Sync {
    /// Create the transport for `device`, or the shared session when `device`
    /// is `None`. `subscriptions` are the topics a broker session must join.
    fn create(
        &self,
        connector: &ConnectorConfig,
        device: Option<&DeviceConfig>,
        subscriptions: Vec<String>,
    ) -> Result<Box<dyn Transport>>;
}

/// Real network transports
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

fn require_device<'a>(connector: &ConnectorConfig, device: Option<&'a DeviceConfig>) -> Result<&'a DeviceConfig> {
    device.ok_or_else(|| {
        ConnSrvError::config(format!(
            "Connector '{}': {} transport needs one connection per device",
            connector.name,
            connector.transport.name()
        ))
    })
}

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        connector: &ConnectorConfig,
        device: Option<&DeviceConfig>,
        subscriptions: Vec<String>,
    ) -> Result<Box<dyn Transport>> {
        match &connector.transport {
            TransportConfig::Tcp(tcp) => {
                let device = require_device(connector, device)?;
                let addr = device.socket_addr(tcp.port)?;
                Ok(Box::new(
                    TcpTransport::new(addr, tcp.framing, Duration::from_millis(tcp.connect_timeout_ms))
                        .with_no_delay(tcp.no_delay),
                ))
            },
            TransportConfig::Mqtt(mqtt) => {
                let client_id = mqtt
                    .client_id
                    .clone()
                    .unwrap_or_else(|| format!("connsrv-{}", connector.id.simple()));
                Ok(Box::new(MqttTransport::new(mqtt, client_id, subscriptions)))
            },
            TransportConfig::WebSocket(ws) => {
                let device = require_device(connector, device)?;
                let addr = device.socket_addr(ws.port)?;
                let url = WebSocketTransport::url_for(&addr, &ws.path);
                Ok(Box::new(WebSocketTransport::new(
                    url,
                    Duration::from_millis(ws.connect_timeout_ms),
                )))
            },
        }
    }
}
