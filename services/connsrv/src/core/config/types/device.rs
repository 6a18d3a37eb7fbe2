//! Device, channel and property configuration documents
//!
//! Snapshots of the Devices module documents a connector runs with. They are
//! read-only for the duration of a run; reconfiguration swaps the snapshot.

use std::collections::HashSet;

use fb_comlink::modbus::RegisterSpec;
use fb_comlink::{ConnectorKind, DataType, Identifier, PropertyAddress, PropertySpec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transport::TransportConfig;
use crate::error::{ConnSrvError, Result};

/// Highest valid Modbus unit id
const MAX_MODBUS_STATION: u8 = 247;

/// Device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub identifier: Identifier,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `host[:port]` (or a full `ws://` URL) of per-device transports
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Modbus unit id
    #[serde(default)]
    pub station: Option<u8>,

    /// Device-level properties
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub identifier: Identifier,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

/// Property configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub identifier: Identifier,

    #[serde(default)]
    pub name: Option<String>,

    pub data_type: DataType,

    #[serde(default)]
    pub settable: bool,

    #[serde(default = "default_true")]
    pub queryable: bool,

    /// Allowed values of enum properties
    #[serde(default)]
    pub format: Vec<String>,

    #[serde(default)]
    pub unit: Option<String>,

    /// Modbus register binding
    #[serde(default)]
    pub register: Option<RegisterSpec>,
}

fn default_true() -> bool {
    true
}

impl PropertyConfig {
    pub fn new(identifier: Identifier, data_type: DataType) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            name: None,
            data_type,
            settable: false,
            queryable: true,
            format: Vec::new(),
            unit: None,
            register: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            name: None,
            properties: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            name: None,
            enabled: true,
            endpoint: None,
            station: None,
            properties: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Every configured property with its address
    pub fn properties(&self) -> impl Iterator<Item = (PropertyAddress, &PropertyConfig)> + '_ {
        let device_level = self.properties.iter().map(move |property| {
            (
                PropertyAddress {
                    device: self.identifier.clone(),
                    channel: None,
                    property: property.identifier.clone(),
                },
                property,
            )
        });
        let channel_level = self.channels.iter().flat_map(move |channel| {
            channel.properties.iter().map(move |property| {
                (
                    PropertyAddress {
                        device: self.identifier.clone(),
                        channel: Some(channel.identifier.clone()),
                        property: property.identifier.clone(),
                    },
                    property,
                )
            })
        });
        device_level.chain(channel_level)
    }

    pub fn property(&self, address: &PropertyAddress) -> Option<&PropertyConfig> {
        if address.device != self.identifier {
            return None;
        }
        let properties = match &address.channel {
            Some(channel) => {
                &self
                    .channels
                    .iter()
                    .find(|c| &c.identifier == channel)?
                    .properties
            },
            None => &self.properties,
        };
        properties.iter().find(|p| p.identifier == address.property)
    }

    /// Codec view of the configured properties
    pub fn property_specs(&self) -> Vec<PropertySpec> {
        self.properties()
            .map(|(address, property)| PropertySpec {
                address,
                data_type: property.data_type,
                settable: property.settable,
                format: property.format.clone(),
                register: property.register.clone(),
                station: self.station,
            })
            .collect()
    }

    /// Endpoint address for per-device transports
    pub fn socket_addr(&self, default_port: u16) -> Result<String> {
        let endpoint = self.endpoint.as_deref().unwrap_or("").trim();
        if endpoint.is_empty() {
            return Err(ConnSrvError::config(format!(
                "device {} has no endpoint",
                self.identifier
            )));
        }
        if endpoint.contains(':') {
            Ok(endpoint.to_string())
        } else {
            Ok(format!("{endpoint}:{default_port}"))
        }
    }

    /// Validate the device against its connector. Errors only affect this device.
    pub fn validate(&self, kind: ConnectorKind, transport: &TransportConfig) -> Result<()> {
        if !transport.is_shared() {
            match transport {
                TransportConfig::Tcp(tcp) => {
                    self.socket_addr(tcp.port)?;
                },
                TransportConfig::WebSocket(ws) => {
                    self.socket_addr(ws.port)?;
                },
                TransportConfig::Mqtt(_) => {},
            }
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(&channel.identifier) {
                return Err(ConnSrvError::config(format!(
                    "device {}: duplicate channel {}",
                    self.identifier, channel.identifier
                )));
            }
        }

        let mut addresses = HashSet::new();
        for (address, property) in self.properties() {
            if !addresses.insert(address.clone()) {
                return Err(ConnSrvError::config(format!("duplicate property {address}")));
            }
            if property.data_type == DataType::Enum && property.format.is_empty() {
                return Err(ConnSrvError::config(format!(
                    "{address}: enum property needs a format"
                )));
            }
            if kind == ConnectorKind::Modbus {
                validate_register(&address, property, self.station)?;
            }
        }
        Ok(())
    }
}

fn validate_register(address: &PropertyAddress, property: &PropertyConfig, station: Option<u8>) -> Result<()> {
    let register = property
        .register
        .as_ref()
        .ok_or_else(|| ConnSrvError::config(format!("{address}: no register mapping")))?;
    let station = register
        .station
        .or(station)
        .ok_or_else(|| ConnSrvError::config(format!("{address}: no Modbus station")))?;
    if station == 0 || station > MAX_MODBUS_STATION {
        return Err(ConnSrvError::config(format!(
            "{address}: station {station} out of range 1..={MAX_MODBUS_STATION}"
        )));
    }
    if property.settable && !register.kind.is_writable() {
        return Err(ConnSrvError::config(format!(
            "{address}: {:?} registers are read-only",
            register.kind
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::types::transport::{MqttConfig, TcpConfig};

    const METER: &str = r#"
identifier: meter-1
endpoint: 192.168.1.50
station: 1
properties:
  - identifier: relay
    data_type: bool
    settable: true
    register: { kind: coil, address: 0 }
channels:
  - identifier: phase-a
    properties:
      - identifier: voltage
        data_type: float32
        register: { kind: input, address: 10, byte_order: CDAB }
"#;

    fn meter() -> DeviceConfig {
        serde_yaml::from_str(METER).unwrap()
    }

    #[test]
    fn test_property_lookup() {
        let device = meter();
        let addresses: Vec<String> = device.properties().map(|(a, _)| a.to_string()).collect();
        assert_eq!(addresses, vec!["meter-1/relay", "meter-1/phase-a/voltage"]);

        let voltage = PropertyAddress::channel_property("meter-1", "phase-a", "voltage").unwrap();
        assert_eq!(device.property(&voltage).unwrap().data_type, DataType::Float32);
        let other = PropertyAddress::device_property("meter-2", "relay").unwrap();
        assert!(device.property(&other).is_none());
    }

    #[test]
    fn test_modbus_validation() {
        let transport = TransportConfig::Tcp(TcpConfig::default());
        let device = meter();
        device.validate(ConnectorKind::Modbus, &transport).unwrap();
        assert_eq!(device.socket_addr(502).unwrap(), "192.168.1.50:502");

        let mut no_station = meter();
        no_station.station = None;
        assert!(no_station.validate(ConnectorKind::Modbus, &transport).is_err());

        let mut read_only = meter();
        read_only.channels[0].properties[0].settable = true;
        assert!(read_only.validate(ConnectorKind::Modbus, &transport).is_err());

        let mut no_endpoint = meter();
        no_endpoint.endpoint = None;
        assert!(no_endpoint.validate(ConnectorKind::Modbus, &transport).is_err());
    }

    #[test]
    fn test_shared_transport_needs_no_endpoint() {
        let device: DeviceConfig = serde_yaml::from_str(
            "identifier: thermostat\nproperties:\n  - identifier: mode\n    data_type: enum\n    format: [heat, cool]\n",
        )
        .unwrap();
        let transport = TransportConfig::Mqtt(MqttConfig::default());
        device.validate(ConnectorKind::FbMqtt, &transport).unwrap();
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        assert!(serde_yaml::from_str::<DeviceConfig>("identifier: Meter\n").is_err());
    }
}
