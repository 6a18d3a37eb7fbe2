//! Connector messages
//!
//! A [`Message`] is an immutable value produced by a codec on decode, or by a
//! write-request initiator, and discarded once a consumer has processed it.
//! Every constructor validates its fields and fails fast with
//! [`ComlinkError::Validation`], so a partially valid message never exists.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ComlinkError, Result};
use crate::state::{ConnectionState, DeviceState};
use crate::value::{DataType, PropertyValue};

/// Longest accepted identifier
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Device, channel or property identifier: `[a-z0-9][a-z0-9_-]*`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(ComlinkError::validation("identifier must not be empty"));
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(ComlinkError::validation(format!(
                "identifier '{value}' is longer than {MAX_IDENTIFIER_LEN} characters"
            )));
        }
        let mut chars = value.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !first_ok || !rest_ok {
            return Err(ComlinkError::validation(format!(
                "identifier '{value}' must match [a-z0-9][a-z0-9_-]*"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identifier {
    type Error = ComlinkError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ComlinkError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a property: device-level or channel-level
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyAddress {
    pub device: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Identifier>,
    pub property: Identifier,
}

impl PropertyAddress {
    pub fn device_property(device: &str, property: &str) -> Result<Self> {
        Ok(Self {
            device: Identifier::new(device)?,
            channel: None,
            property: Identifier::new(property)?,
        })
    }

    pub fn channel_property(device: &str, channel: &str, property: &str) -> Result<Self> {
        Ok(Self {
            device: Identifier::new(device)?,
            channel: Some(Identifier::new(channel)?),
            property: Identifier::new(property)?,
        })
    }
}

impl fmt::Display for PropertyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}/{}/{}", self.device, channel, self.property),
            None => write!(f, "{}/{}", self.device, self.property),
        }
    }
}

/// Discriminator used to route messages to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ConnectionState,
    DeviceState,
    DeviceAttribute,
    PropertyState,
    PropertyWrite,
    DeviceDiscovered,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionState => "connection_state",
            Self::DeviceState => "device_state",
            Self::DeviceAttribute => "device_attribute",
            Self::PropertyState => "property_state",
            Self::PropertyWrite => "property_write",
            Self::DeviceDiscovered => "device_discovered",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport lifecycle event for the connector (`device == None`) or one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStateMessage {
    connector: Uuid,
    device: Option<Identifier>,
    state: ConnectionState,
    reason: Option<String>,
}

impl ConnectionStateMessage {
    pub fn new(
        connector: Uuid,
        device: Option<Identifier>,
        state: ConnectionState,
        reason: Option<String>,
    ) -> Self {
        Self {
            connector,
            device,
            state,
            reason,
        }
    }

    pub fn device(&self) -> Option<&Identifier> {
        self.device.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// State a device reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStateMessage {
    connector: Uuid,
    device: Identifier,
    state: DeviceState,
}

impl DeviceStateMessage {
    pub fn new(connector: Uuid, device: Identifier, state: DeviceState) -> Self {
        Self {
            connector,
            device,
            state,
        }
    }

    pub fn device(&self) -> &Identifier {
        &self.device
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }
}

/// Descriptive device attribute (name, hardware/firmware info...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceAttributeMessage {
    connector: Uuid,
    device: Identifier,
    attribute: String,
    value: String,
}

impl DeviceAttributeMessage {
    pub fn new(
        connector: Uuid,
        device: Identifier,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        if attribute.is_empty() || attribute.len() > MAX_IDENTIFIER_LEN {
            return Err(ComlinkError::validation(format!(
                "attribute name '{attribute}' must be 1..={MAX_IDENTIFIER_LEN} characters"
            )));
        }
        Ok(Self {
            connector,
            device,
            attribute,
            value: value.into(),
        })
    }

    pub fn device(&self) -> &Identifier {
        &self.device
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Actual value reported for a property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyStateMessage {
    connector: Uuid,
    address: PropertyAddress,
    value: PropertyValue,
}

impl PropertyStateMessage {
    pub fn new(connector: Uuid, address: PropertyAddress, value: PropertyValue) -> Result<Self> {
        value.validate()?;
        Ok(Self {
            connector,
            address,
            value,
        })
    }

    pub fn address(&self) -> &PropertyAddress {
        &self.address
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }
}

/// Request to change a property on the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyWriteMessage {
    connector: Uuid,
    address: PropertyAddress,
    value: PropertyValue,
}

impl PropertyWriteMessage {
    pub fn new(connector: Uuid, address: PropertyAddress, value: PropertyValue) -> Result<Self> {
        value.validate()?;
        Ok(Self {
            connector,
            address,
            value,
        })
    }

    pub fn address(&self) -> &PropertyAddress {
        &self.address
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Same target with another value
    pub fn with_value(&self, value: PropertyValue) -> Result<Self> {
        Self::new(self.connector, self.address.clone(), value)
    }
}

/// Property found while discovering a device. Unknown fields stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredProperty {
    pub identifier: Identifier,
    pub name: Option<String>,
    pub data_type: Option<DataType>,
    pub settable: Option<bool>,
    pub queryable: Option<bool>,
    pub format: Option<Vec<String>>,
    pub unit: Option<String>,
}

impl DiscoveredProperty {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            name: None,
            data_type: None,
            settable: None,
            queryable: None,
            format: None,
            unit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredChannel {
    pub identifier: Identifier,
    pub properties: Vec<DiscoveredProperty>,
}

/// Device description found by discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    connector: Uuid,
    device: Identifier,
    name: Option<String>,
    model: Option<String>,
    firmware: Option<String>,
    properties: Vec<DiscoveredProperty>,
    channels: Vec<DiscoveredChannel>,
}

impl DiscoveredDevice {
    pub fn new(connector: Uuid, device: Identifier) -> Self {
        Self {
            connector,
            device,
            name: None,
            model: None,
            firmware: None,
            properties: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = Some(firmware.into());
        self
    }

    pub fn with_property(mut self, property: DiscoveredProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_channel(mut self, channel: DiscoveredChannel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn device(&self) -> &Identifier {
        &self.device
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    pub fn properties(&self) -> &[DiscoveredProperty] {
        &self.properties
    }

    pub fn channels(&self) -> &[DiscoveredChannel] {
        &self.channels
    }

    /// Fold a later (possibly partial) discovery of the same device into this one.
    /// Known values of `other` win; properties and channels are matched by identifier.
    pub fn merge(&mut self, other: &DiscoveredDevice) {
        if other.name.is_some() {
            self.name.clone_from(&other.name);
        }
        if other.model.is_some() {
            self.model.clone_from(&other.model);
        }
        if other.firmware.is_some() {
            self.firmware.clone_from(&other.firmware);
        }
        merge_properties(&mut self.properties, &other.properties);
        for channel in &other.channels {
            match self
                .channels
                .iter_mut()
                .find(|known| known.identifier == channel.identifier)
            {
                Some(known) => merge_properties(&mut known.properties, &channel.properties),
                None => self.channels.push(channel.clone()),
            }
        }
    }
}

fn merge_properties(known: &mut Vec<DiscoveredProperty>, found: &[DiscoveredProperty]) {
    for property in found {
        let Some(existing) = known
            .iter_mut()
            .find(|existing| existing.identifier == property.identifier)
        else {
            known.push(property.clone());
            continue;
        };
        if property.name.is_some() {
            existing.name.clone_from(&property.name);
        }
        if property.data_type.is_some() {
            existing.data_type = property.data_type;
        }
        if property.settable.is_some() {
            existing.settable = property.settable;
        }
        if property.queryable.is_some() {
            existing.queryable = property.queryable;
        }
        if property.format.is_some() {
            existing.format.clone_from(&property.format);
        }
        if property.unit.is_some() {
            existing.unit.clone_from(&property.unit);
        }
    }
}

/// Typed connector message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    ConnectionState(ConnectionStateMessage),
    DeviceState(DeviceStateMessage),
    DeviceAttribute(DeviceAttributeMessage),
    PropertyState(PropertyStateMessage),
    PropertyWrite(PropertyWriteMessage),
    DeviceDiscovered(DiscoveredDevice),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ConnectionState(_) => MessageKind::ConnectionState,
            Self::DeviceState(_) => MessageKind::DeviceState,
            Self::DeviceAttribute(_) => MessageKind::DeviceAttribute,
            Self::PropertyState(_) => MessageKind::PropertyState,
            Self::PropertyWrite(_) => MessageKind::PropertyWrite,
            Self::DeviceDiscovered(_) => MessageKind::DeviceDiscovered,
        }
    }

    pub fn connector(&self) -> Uuid {
        match self {
            Self::ConnectionState(m) => m.connector,
            Self::DeviceState(m) => m.connector,
            Self::DeviceAttribute(m) => m.connector,
            Self::PropertyState(m) => m.connector,
            Self::PropertyWrite(m) => m.connector,
            Self::DeviceDiscovered(m) => m.connector,
        }
    }

    /// Device the message targets, `None` for connector-wide events
    pub fn device(&self) -> Option<&Identifier> {
        match self {
            Self::ConnectionState(m) => m.device.as_ref(),
            Self::DeviceState(m) => Some(&m.device),
            Self::DeviceAttribute(m) => Some(&m.device),
            Self::PropertyState(m) => Some(&m.address.device),
            Self::PropertyWrite(m) => Some(&m.address.device),
            Self::DeviceDiscovered(m) => Some(&m.device),
        }
    }
}
