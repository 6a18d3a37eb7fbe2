//! Codec registry
//!
//! Connector services never name a concrete codec; they ask the registry for
//! the codec of a [`ConnectorKind`] and hand it a [`CodecContext`] describing
//! the configured properties.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::codec::{Codec, QoS};
use crate::error::{ComlinkError, Result};
use crate::fbmqtt::{FbMqttCodec, TopicGrammar};
use crate::message::PropertyAddress;
use crate::modbus::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use crate::modbus::{ModbusCodec, ModbusFraming, RegisterEntry, RegisterMap, RegisterSpec};
use crate::shelly::{ComponentTable, ShellyCodec};
use crate::value::DataType;

/// Vendor protocol family of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Modbus,
    #[serde(alias = "fb-mqtt")]
    FbMqtt,
    Shelly,
}

impl ConnectorKind {
    /// Source tag attached to published documents
    pub fn source(&self) -> &'static str {
        match self {
            Self::Modbus => "com.fastybird.modbus-connector",
            Self::FbMqtt => "com.fastybird.fb-mqtt-connector",
            Self::Shelly => "com.fastybird.shelly-connector",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modbus => write!(f, "modbus"),
            Self::FbMqtt => write!(f, "fb_mqtt"),
            Self::Shelly => write!(f, "shelly"),
        }
    }
}

/// A configured property as far as codecs are concerned
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub address: PropertyAddress,
    pub data_type: DataType,
    pub settable: bool,
    pub format: Vec<String>,
    /// Modbus binding
    pub register: Option<RegisterSpec>,
    /// Device station (Modbus unit id)
    pub station: Option<u8>,
}

/// Protocol knobs taken from the connector configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    pub modbus_framing: ModbusFraming,
    /// How long a Modbus read waits for its response
    pub modbus_response_timeout: Duration,
    pub mqtt_qos: QoS,
    pub rpc_source: String,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            modbus_framing: ModbusFraming::default(),
            modbus_response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            mqtt_qos: QoS::AtLeastOnce,
            rpc_source: "connsrv".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecContext {
    pub connector: Uuid,
    pub properties: Vec<PropertySpec>,
    pub options: CodecOptions,
}

impl CodecContext {
    pub fn new(connector: Uuid) -> Self {
        Self {
            connector,
            properties: Vec::new(),
            options: CodecOptions::default(),
        }
    }
}

type CodecFactory = Box<dyn Fn(&CodecContext) -> Result<Box<dyn Codec>> + Send + Sync>;

/// Codec constructors keyed by connector kind
pub struct CodecRegistry {
    factories: HashMap<ConnectorKind, CodecFactory>,
}

impl CodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in codecs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ConnectorKind::Modbus, |ctx| {
            let map = build_register_map(&ctx.properties)?;
            Ok(Box::new(
                ModbusCodec::new(ctx.connector, ctx.options.modbus_framing, map)
                    .with_response_timeout(ctx.options.modbus_response_timeout),
            ))
        });
        registry.register(ConnectorKind::FbMqtt, |ctx| {
            Ok(Box::new(FbMqttCodec::new(
                ctx.connector,
                TopicGrammar::v1()?,
                ctx.options.mqtt_qos,
            )))
        });
        registry.register(ConnectorKind::Shelly, |ctx| {
            Ok(Box::new(ShellyCodec::new(
                ctx.connector,
                ComponentTable::gen2(),
                ctx.options.rpc_source.clone(),
            )))
        });
        registry
    }

    /// Register or replace the constructor of a kind
    pub fn register<F>(&mut self, kind: ConnectorKind, factory: F)
    where
        F: Fn(&CodecContext) -> Result<Box<dyn Codec>> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Box::new(factory)).is_some() {
            debug!("Replaced codec factory for {}", kind);
        }
    }

    pub fn contains(&self, kind: ConnectorKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn build(&self, kind: ConnectorKind, ctx: &CodecContext) -> Result<Box<dyn Codec>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| ComlinkError::unsupported(format!("no codec registered for {kind}")))?;
        factory(ctx)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn build_register_map(properties: &[PropertySpec]) -> Result<RegisterMap> {
    let mut map = RegisterMap::new();
    for property in properties {
        let Some(register) = &property.register else {
            continue;
        };
        let station = register.station.or(property.station).ok_or_else(|| {
            ComlinkError::invalid_argument(format!("{}: no Modbus station configured", property.address))
        })?;
        map.insert(RegisterEntry::new(
            property.address.clone(),
            station,
            register,
            property.data_type,
        )?)?;
    }
    Ok(map)
}
