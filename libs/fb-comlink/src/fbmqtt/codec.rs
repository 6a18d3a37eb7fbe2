//! FastyBird MQTT v1 codec

use std::collections::HashSet;

use tracing::trace;
use uuid::Uuid;

use super::topic::{ParsedTopic, TopicGrammar, TopicKind};
use crate::codec::{Codec, MqttPublish, QoS, WireFrame};
use crate::error::{ComlinkError, Result};
use crate::message::{
    DeviceAttributeMessage, DeviceStateMessage, DiscoveredChannel, DiscoveredDevice,
    DiscoveredProperty, Identifier, Message, PropertyAddress, PropertyStateMessage,
};
use crate::state::DeviceState;
use crate::value::{DataType, PropertyValue, PAYLOAD_BOOL_FALSE_VALUE, PAYLOAD_BOOL_TRUE_VALUE};

pub struct FbMqttCodec {
    connector: Uuid,
    grammar: TopicGrammar,
    write_qos: QoS,
    /// Properties the device publishes with the short topic form
    short_form: HashSet<PropertyAddress>,
}

impl FbMqttCodec {
    pub fn new(connector: Uuid, grammar: TopicGrammar, write_qos: QoS) -> Self {
        Self {
            connector,
            grammar,
            write_qos,
            short_form: HashSet::new(),
        }
    }

    fn decode_publish(&mut self, publish: &MqttPublish) -> Result<Vec<Message>> {
        let topic = self.grammar.parse(&publish.topic)?;
        let payload = publish.payload_str()?.trim();
        let device = identifier(&topic.device)?;

        let message = match topic.kind {
            TopicKind::DeviceState => {
                let state: DeviceState = payload.parse()?;
                Message::DeviceState(DeviceStateMessage::new(self.connector, device, state))
            },
            TopicKind::DeviceAttribute => self.device_attribute(device, &topic, payload)?,
            TopicKind::ChannelAttribute => match self.channel_attribute(device, &topic, payload)? {
                Some(message) => message,
                None => return Ok(Vec::new()),
            },
            TopicKind::DeviceProperty | TopicKind::ChannelProperty | TopicKind::ShortProperty => {
                if topic.set {
                    trace!("Ignoring write request echo on {}", publish.topic);
                    return Ok(Vec::new());
                }
                let address = address(device, &topic)?;
                if topic.kind == TopicKind::ShortProperty {
                    self.short_form.insert(address.clone());
                }
                Message::PropertyState(PropertyStateMessage::new(
                    self.connector,
                    address,
                    PropertyValue::infer(payload),
                )?)
            },
            TopicKind::DevicePropertyAttribute | TopicKind::ChannelPropertyAttribute => {
                self.property_attribute(device, &topic, payload)?
            },
        };
        Ok(vec![message])
    }

    fn device_attribute(&self, device: Identifier, topic: &ParsedTopic, payload: &str) -> Result<Message> {
        let attribute = topic.attribute.as_deref().unwrap_or_default();
        let discovered = DiscoveredDevice::new(self.connector, device.clone());
        let message = match attribute {
            "properties" => {
                let mut discovered = discovered;
                for property in list(payload)? {
                    discovered = discovered.with_property(DiscoveredProperty::new(property));
                }
                Message::DeviceDiscovered(discovered)
            },
            "channels" => {
                let mut discovered = discovered;
                for channel in list(payload)? {
                    discovered = discovered.with_channel(DiscoveredChannel {
                        identifier: channel,
                        properties: Vec::new(),
                    });
                }
                Message::DeviceDiscovered(discovered)
            },
            _ => Message::DeviceAttribute(DeviceAttributeMessage::new(
                self.connector,
                device,
                attribute,
                payload,
            )?),
        };
        Ok(message)
    }

    fn channel_attribute(
        &self,
        device: Identifier,
        topic: &ParsedTopic,
        payload: &str,
    ) -> Result<Option<Message>> {
        if topic.attribute.as_deref() != Some("properties") {
            trace!("Ignoring channel attribute {:?}", topic.attribute);
            return Ok(None);
        }
        let channel = identifier(topic.channel.as_deref().unwrap_or_default())?;
        let properties = list(payload)?
            .into_iter()
            .map(DiscoveredProperty::new)
            .collect();
        let discovered = DiscoveredDevice::new(self.connector, device).with_channel(DiscoveredChannel {
            identifier: channel,
            properties,
        });
        Ok(Some(Message::DeviceDiscovered(discovered)))
    }

    fn property_attribute(&self, device: Identifier, topic: &ParsedTopic, payload: &str) -> Result<Message> {
        let mut property = DiscoveredProperty::new(identifier(
            topic.property.as_deref().unwrap_or_default(),
        )?);
        match topic.attribute.as_deref().unwrap_or_default() {
            "name" => property.name = Some(payload.to_string()),
            "settable" => property.settable = Some(flag(payload)?),
            "queryable" => property.queryable = Some(flag(payload)?),
            "data-type" => property.data_type = Some(payload.parse::<DataType>()?),
            "format" => {
                property.format = Some(
                    payload
                        .split(',')
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty())
                        .collect(),
                )
            },
            "unit" => property.unit = Some(payload.to_string()),
            other => {
                return Err(ComlinkError::unsupported(format!(
                    "property attribute '${other}'"
                )))
            },
        }

        let discovered = DiscoveredDevice::new(self.connector, device);
        let discovered = match topic.channel.as_deref() {
            Some(channel) => discovered.with_channel(DiscoveredChannel {
                identifier: identifier(channel)?,
                properties: vec![property],
            }),
            None => discovered.with_property(property),
        };
        Ok(Message::DeviceDiscovered(discovered))
    }
}

impl Codec for FbMqttCodec {
    fn name(&self) -> &'static str {
        "fb-mqtt"
    }

    fn decode(&mut self, _origin: Option<&Identifier>, frame: &WireFrame) -> Result<Vec<Message>> {
        match frame {
            WireFrame::Mqtt(publish) => self.decode_publish(publish),
            other => Err(ComlinkError::malformed(format!(
                "FastyBird MQTT expects publish frames, got {other:?}"
            ))),
        }
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<WireFrame>> {
        let Message::PropertyWrite(write) = message else {
            return Err(ComlinkError::invalid_argument(format!(
                "FastyBird MQTT cannot encode {} messages",
                message.kind()
            )));
        };
        let short_form = self.short_form.contains(write.address());
        let topic = format!("{}/set", self.grammar.property_topic(write.address(), short_form));
        Ok(vec![WireFrame::Mqtt(MqttPublish::new(
            topic,
            write.value().to_payload(),
            self.write_qos,
            false,
        ))])
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![self.grammar.subscription()]
    }
}

fn identifier(raw: &str) -> Result<Identifier> {
    Identifier::new(raw).map_err(|e| ComlinkError::malformed(e.to_string()))
}

fn address(device: Identifier, topic: &ParsedTopic) -> Result<PropertyAddress> {
    Ok(PropertyAddress {
        device,
        channel: topic.channel.as_deref().map(identifier).transpose()?,
        property: identifier(topic.property.as_deref().unwrap_or_default())?,
    })
}

fn list(payload: &str) -> Result<Vec<Identifier>> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(identifier)
        .collect()
}

fn flag(payload: &str) -> Result<bool> {
    match payload {
        PAYLOAD_BOOL_TRUE_VALUE => Ok(true),
        PAYLOAD_BOOL_FALSE_VALUE => Ok(false),
        other => Err(ComlinkError::malformed(format!("'{other}' is not a boolean flag"))),
    }
}
