//! Wire codec contract
//!
//! A codec translates between [`WireFrame`]s and typed [`Message`]s for one
//! vendor protocol. Codecs are stateful (`&mut self`) so they can correlate
//! responses with the requests they produced.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ComlinkError, Result};
use crate::message::{Identifier, Message};

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn from_u8(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ComlinkError::malformed(format!("QoS level {other}"))),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// One MQTT publish packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl MqttPublish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| ComlinkError::malformed(format!("payload on '{}' is not UTF-8: {e}", self.topic)))
    }
}

/// Unit of data exchanged with a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Raw bytes (Modbus ADU)
    Binary(Bytes),
    /// MQTT publish
    Mqtt(MqttPublish),
    /// Text message (JSON-RPC over WebSocket)
    Text(String),
}

impl WireFrame {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(bytes) => bytes.len(),
            Self::Mqtt(publish) => publish.payload.len(),
            Self::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            },
            Self::Mqtt(publish) => write!(
                f,
                "{} [qos {}] {}",
                publish.topic,
                publish.qos.as_u8(),
                String::from_utf8_lossy(&publish.payload)
            ),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Vendor wire codec
pub trait Codec: Send {
    /// Short protocol name used in logs
    fn name(&self) -> &'static str;

    /// Decode one inbound frame. `origin` is the device whose connection
    /// delivered the frame, `None` for shared broker sessions.
    fn decode(&mut self, origin: Option<&Identifier>, frame: &WireFrame) -> Result<Vec<Message>>;

    /// Encode an outbound message (property writes)
    fn encode(&mut self, message: &Message) -> Result<Vec<WireFrame>>;

    /// Read requests to issue when a device's poll interval elapses
    fn poll_frames(&mut self, _device: &Identifier) -> Result<Vec<WireFrame>> {
        Ok(Vec::new())
    }

    /// Discovery probes for a device connection, or for the shared session
    fn discovery_frames(&mut self, _device: Option<&Identifier>) -> Vec<WireFrame> {
        Vec::new()
    }

    /// Topics to subscribe on broker-style transports
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Forget correlation state of a connection that was re-established
    fn connection_reset(&mut self, _device: Option<&Identifier>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_frame_display() {
        let frame = WireFrame::Binary(Bytes::from_static(&[0x01, 0x0F, 0xAB]));
        assert_eq!(frame.to_string(), "01 0F AB");
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::from_u8(1), Ok(QoS::AtLeastOnce));
        assert!(QoS::from_u8(3).is_err());
        assert_eq!(QoS::ExactlyOnce.as_u8(), 2);
    }

    #[test]
    fn test_payload_str() {
        let publish = MqttPublish::new("/fb/v1/dev/$state", &b"ready"[..], QoS::AtMostOnce, true);
        assert_eq!(publish.payload_str(), Ok("ready"));
        let publish = MqttPublish::new("/t", vec![0xFF, 0xFE], QoS::AtMostOnce, false);
        assert!(publish.payload_str().is_err());
    }
}
