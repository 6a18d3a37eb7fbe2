//! Transport configuration types

use fb_comlink::modbus::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use fb_comlink::modbus::ModbusFraming;
use fb_comlink::ConnectorKind;
use serde::{Deserialize, Serialize};

use crate::error::{ConnSrvError, Result};

/// Physical transport of a connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// One TCP socket per device (Modbus TCP, or RTU through a serial gateway)
    Tcp(TcpConfig),
    /// One broker session shared by every device of the connector
    Mqtt(MqttConfig),
    /// One WebSocket per device (Shelly Gen2 RPC)
    WebSocket(WebSocketConfig),
}

impl TransportConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Mqtt(_) => "mqtt",
            Self::WebSocket(_) => "web_socket",
        }
    }

    /// Broker-style transports carry all devices over one session
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Mqtt(_))
    }

    /// The transport a connector kind speaks
    pub fn supports(&self, kind: ConnectorKind) -> bool {
        matches!(
            (kind, self),
            (ConnectorKind::Modbus, Self::Tcp(_))
                | (ConnectorKind::FbMqtt, Self::Mqtt(_))
                | (ConnectorKind::Shelly, Self::WebSocket(_))
        )
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Tcp(tcp) => {
                if tcp.port == 0 {
                    return Err(ConnSrvError::config("TCP port cannot be zero"));
                }
                if tcp.connect_timeout_ms == 0 {
                    return Err(ConnSrvError::config("TCP connect timeout must be greater than zero"));
                }
                if tcp.response_timeout_ms == 0 {
                    return Err(ConnSrvError::config("Modbus response timeout must be greater than zero"));
                }
            },
            Self::Mqtt(mqtt) => {
                if mqtt.host.is_empty() {
                    return Err(ConnSrvError::config("MQTT broker host cannot be empty"));
                }
                if mqtt.port == 0 {
                    return Err(ConnSrvError::config("MQTT broker port cannot be zero"));
                }
                if mqtt.qos > 2 {
                    return Err(ConnSrvError::config(format!("MQTT QoS {} out of range", mqtt.qos)));
                }
                if mqtt.password.is_some() && mqtt.username.is_none() {
                    return Err(ConnSrvError::config("MQTT password given without username"));
                }
            },
            Self::WebSocket(ws) => {
                if !ws.path.starts_with('/') {
                    return Err(ConnSrvError::config(format!(
                        "WebSocket path '{}' must start with '/'",
                        ws.path
                    )));
                }
                if ws.connect_timeout_ms == 0 {
                    return Err(ConnSrvError::config(
                        "WebSocket connect timeout must be greater than zero",
                    ));
                }
            },
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Tcp(TcpConfig::default())
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Port used when a device endpoint has none
    #[serde(default = "default_tcp_port")]
    pub port: u16,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Modbus framing on the wire
    #[serde(default)]
    pub framing: ModbusFraming,

    /// Wait for a read response before the read is given up
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// TCP no-delay (Nagle algorithm)
    #[serde(default = "default_true")]
    pub no_delay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: default_tcp_port(),
            connect_timeout_ms: default_timeout_ms(),
            framing: ModbusFraming::default(),
            response_timeout_ms: default_response_timeout_ms(),
            no_delay: true,
        }
    }
}

/// MQTT broker session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Defaults to `connsrv-<connector id>`
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,

    /// QoS of outgoing writes and subscriptions
    #[serde(default = "default_mqtt_qos")]
    pub qos: u8,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request channel capacity of the client
    #[serde(default = "default_mqtt_capacity")]
    pub capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_s: default_keep_alive_s(),
            qos: default_mqtt_qos(),
            connect_timeout_ms: default_timeout_ms(),
            capacity: default_mqtt_capacity(),
        }
    }
}

/// WebSocket transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_port")]
    pub port: u16,

    #[serde(default = "default_ws_path")]
    pub path: String,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: default_ws_port(),
            path: default_ws_path(),
            connect_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tcp_port() -> u16 {
    502
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_mqtt_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_s() -> u64 {
    30
}

fn default_mqtt_qos() -> u8 {
    1
}

fn default_mqtt_capacity() -> usize {
    64
}

fn default_ws_port() -> u16 {
    80
}

fn default_ws_path() -> String {
    "/rpc".to_string()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_tagged_transport() {
        let config: TransportConfig =
            serde_yaml::from_str("type: mqtt\nhost: broker.local\nusername: fb\npassword: secret\n").unwrap();
        let TransportConfig::Mqtt(mqtt) = &config else {
            panic!("expected mqtt");
        };
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert!(config.is_shared());
        assert!(config.supports(ConnectorKind::FbMqtt));
        assert!(!config.supports(ConnectorKind::Modbus));
        config.validate().unwrap();
    }

    #[test]
    fn test_tcp_defaults() {
        let config: TransportConfig = serde_yaml::from_str("type: tcp\nframing: rtu\n").unwrap();
        assert_eq!(
            config,
            TransportConfig::Tcp(TcpConfig {
                framing: ModbusFraming::Rtu,
                ..TcpConfig::default()
            })
        );
    }

    #[test]
    fn test_invalid_transport() {
        let config = TransportConfig::Mqtt(MqttConfig {
            qos: 3,
            ..MqttConfig::default()
        });
        assert!(config.validate().is_err());

        let config = TransportConfig::WebSocket(WebSocketConfig {
            path: "rpc".to_string(),
            ..WebSocketConfig::default()
        });
        assert!(config.validate().is_err());

        let config = TransportConfig::Tcp(TcpConfig {
            response_timeout_ms: 0,
            ..TcpConfig::default()
        });
        assert!(config.validate().is_err());
    }
}
