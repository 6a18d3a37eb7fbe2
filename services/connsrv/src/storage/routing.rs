//! Exchange routing keys of state documents

use std::fmt;

use serde::{Serialize, Serializer};

const PREFIX: &str = "fb.exchange.module.document";

/// Routing key of a document published to the platform exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    ConnectorState,
    DeviceState,
    DeviceAttribute,
    DeviceProperty,
    ChannelProperty,
    DeviceDiscovered,
}

impl RoutingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectorState => "fb.exchange.module.document.reported.connector.state",
            Self::DeviceState => "fb.exchange.module.document.reported.device.state",
            Self::DeviceAttribute => "fb.exchange.module.document.reported.device.attribute",
            Self::DeviceProperty => "fb.exchange.module.document.reported.device.property",
            Self::ChannelProperty => "fb.exchange.module.document.reported.channel.property",
            Self::DeviceDiscovered => "fb.exchange.module.document.discovered.device",
        }
    }

    /// Document entity suffix, e.g. `device.property`
    pub fn entity(&self) -> &'static str {
        let key = self.as_str();
        let rest = &key[PREFIX.len() + 1..];
        rest.split_once('.').map_or(rest, |(_, entity)| entity)
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RoutingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
