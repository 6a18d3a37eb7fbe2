//! FastyBird Connector Communication Library
//!
//! Wire-level building blocks shared by every connector service.
//!
//! # Architecture
//!
//! This library provides:
//! - **Message model**: validated, immutable [`Message`] values exchanged between codecs,
//!   the connector queue and consumers
//! - **Value model**: [`DataType`] tags and [`PropertyValue`] coercion
//! - **Bytes utilities**: [`ByteOrder`] handling for multi-register values
//! - **Codecs**: Modbus RTU/TCP, FastyBird MQTT v1 and Shelly Gen2 JSON-RPC, all
//!   driven by grammar tables and selected through [`CodecRegistry`]

pub mod bytes;
pub mod codec;
pub mod error;
pub mod fbmqtt;
pub mod message;
pub mod modbus;
pub mod registry;
pub mod shelly;
pub mod state;
pub mod value;

// Re-export core types
pub use bytes::ByteOrder;
pub use codec::{Codec, MqttPublish, QoS, WireFrame};
pub use error::{ComlinkError, Result};
pub use message::{
    ConnectionStateMessage, DeviceAttributeMessage, DeviceStateMessage, DiscoveredChannel,
    DiscoveredDevice, DiscoveredProperty, Identifier, Message, MessageKind, PropertyAddress,
    PropertyStateMessage, PropertyWriteMessage,
};
pub use registry::{CodecContext, CodecOptions, CodecRegistry, ConnectorKind, PropertySpec};
pub use state::{ConnectionState, DeviceState};
pub use value::{DataType, PropertyValue, PAYLOAD_BOOL_FALSE_VALUE, PAYLOAD_BOOL_TRUE_VALUE};
