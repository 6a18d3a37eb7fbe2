//! Connector configuration types

use std::collections::HashSet;
use std::time::Duration;

use fb_comlink::{CodecContext, CodecOptions, ConnectorKind, Identifier, PropertyAddress, QoS};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::{DeviceConfig, PropertyConfig};
use super::transport::TransportConfig;
use crate::error::{ConnSrvError, ErrorExt, Result};

/// One connector instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    pub kind: ConnectorKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// How often devices are polled (Modbus reads, Shelly status)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Orchestrator housekeeping period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// `src` of outgoing JSON-RPC calls
    #[serde(default)]
    pub rpc_source: Option<String>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// ±25% random spread on each delay
    #[serde(default)]
    pub jitter: bool,

    /// 0 retries forever
    #[serde(default)]
    pub max_attempts: u32,
}

/// Write coalescing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// 0 sends writes immediately
    #[serde(default = "default_debounce_ms")]
    pub window_ms: u64,
}

/// What happens when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// No capacity limit
    #[default]
    Unbounded,
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Ignored for `unbounded`
    #[serde(default)]
    pub capacity: Option<usize>,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Register devices and properties reported by the wire
    #[serde(default)]
    pub enabled: bool,

    /// Repeat discovery probes; 0 probes once per connection
    #[serde(default)]
    pub interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_debounce_ms() -> u64 {
    2000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: false,
            max_attempts: 0,
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_debounce_ms(),
        }
    }
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, kind: ConnectorKind, transport: TransportConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            enabled: true,
            transport,
            reconnect: ReconnectConfig::default(),
            debounce: DebounceConfig::default(),
            queue: QueueConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            discovery: DiscoveryConfig::default(),
            rpc_source: None,
            devices: Vec::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn device(&self, identifier: &Identifier) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| &d.identifier == identifier)
    }

    pub fn property(&self, address: &PropertyAddress) -> Option<&PropertyConfig> {
        self.device(&address.device)?.property(address)
    }

    /// Protocol knobs for the codec
    pub fn codec_options(&self) -> CodecOptions {
        let mut options = CodecOptions::default();
        match &self.transport {
            TransportConfig::Tcp(tcp) => {
                options.modbus_framing = tcp.framing;
                options.modbus_response_timeout = Duration::from_millis(tcp.response_timeout_ms);
            },
            TransportConfig::Mqtt(mqtt) => {
                options.mqtt_qos = QoS::from_u8(mqtt.qos).unwrap_or_default();
            },
            TransportConfig::WebSocket(_) => {},
        }
        if let Some(source) = &self.rpc_source {
            options.rpc_source.clone_from(source);
        }
        options
    }

    /// Codec context covering the given devices
    pub fn codec_context<'a>(&self, devices: impl IntoIterator<Item = &'a DeviceConfig>) -> CodecContext {
        let mut ctx = CodecContext::new(self.id);
        ctx.options = self.codec_options();
        for device in devices {
            ctx.properties.extend(device.property_specs());
        }
        ctx
    }

    /// Connector-wide checks. Device problems are reported by
    /// [`DeviceConfig::validate`] and only disable that device.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConnSrvError::config(format!("connector {}: name cannot be empty", self.id)));
        }
        if !self.transport.supports(self.kind) {
            return Err(ConnSrvError::config(format!(
                "connector {}: {} connectors cannot use a {} transport",
                self.name,
                self.kind,
                self.transport.name()
            )));
        }
        self.transport
            .validate()
            .config_error(&format!("connector {}", self.name))?;

        if self.poll_interval_ms == 0 || self.tick_interval_ms == 0 {
            return Err(ConnSrvError::config(format!(
                "connector {}: poll and tick intervals must be greater than zero",
                self.name
            )));
        }
        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ConnSrvError::config(format!(
                "connector {}: reconnect delays must satisfy 0 < initial <= max",
                self.name
            )));
        }
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(ConnSrvError::config(format!(
                "connector {}: reconnect multiplier must be >= 1",
                self.name
            )));
        }
        if self.queue.overflow != OverflowPolicy::Unbounded && self.queue.capacity.unwrap_or(0) == 0 {
            return Err(ConnSrvError::config(format!(
                "connector {}: bounded queue needs a capacity",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(&device.identifier) {
                return Err(ConnSrvError::config(format!(
                    "connector {}: duplicate device {}",
                    self.name, device.identifier
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::types::transport::{MqttConfig, TcpConfig};
    use fb_comlink::modbus::ModbusFraming;

    #[test]
    fn test_defaults() {
        let config: ConnectorConfig =
            serde_yaml::from_str("name: modbus\nkind: modbus\ntransport: { type: tcp }\n").unwrap();
        assert!(config.enabled);
        assert_eq!(config.debounce.window(), Duration::from_millis(2000));
        assert_eq!(config.queue.overflow, OverflowPolicy::Unbounded);
        assert_eq!(config.reconnect.multiplier, 2.0);
        assert!(!config.reconnect.jitter);
        config.validate().unwrap();
    }

    #[test]
    fn test_kind_transport_mismatch() {
        let config = ConnectorConfig::new(
            "broker",
            ConnectorKind::Modbus,
            TransportConfig::Mqtt(MqttConfig::default()),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounded_queue_needs_capacity() {
        let mut config = ConnectorConfig::new(
            "modbus",
            ConnectorKind::Modbus,
            TransportConfig::Tcp(TcpConfig::default()),
        );
        config.queue.overflow = OverflowPolicy::DropOldest;
        assert!(config.validate().is_err());
        config.queue.capacity = Some(16);
        config.validate().unwrap();
    }

    #[test]
    fn test_codec_options() {
        let mut config = ConnectorConfig::new(
            "broker",
            ConnectorKind::FbMqtt,
            TransportConfig::Mqtt(MqttConfig {
                qos: 2,
                ..MqttConfig::default()
            }),
        );
        config.rpc_source = Some("fb-bridge".to_string());
        let options = config.codec_options();
        assert_eq!(options.mqtt_qos, QoS::ExactlyOnce);
        assert_eq!(options.rpc_source, "fb-bridge");

        let config: ConnectorConfig = serde_yaml::from_str(
            "name: plc\nkind: modbus\ntransport: { type: tcp, framing: rtu, response_timeout_ms: 750 }\n",
        )
        .unwrap();
        let options = config.codec_options();
        assert_eq!(options.modbus_framing, ModbusFraming::Rtu);
        assert_eq!(options.modbus_response_timeout, Duration::from_millis(750));
    }
}
