//! In-memory state store
//!
//! Uses DashMap so the service and diagnostics can read while a connector
//! writes. Only changes are published.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fb_comlink::{ConnectionState, DeviceState, DiscoveredDevice, Identifier, PropertyAddress, PropertyValue};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::publisher::Publisher;
use super::routing::RoutingKey;
use super::types::{ConnectionRecord, PropertyRecord};
use super::StateStore;
use crate::error::Result;

type DeviceKey = (Uuid, Identifier);

/// In-memory store publishing through a [`Publisher`]
pub struct MemoryStateStore {
    publisher: Arc<dyn Publisher>,
    sources: DashMap<Uuid, String>,
    connections: DashMap<(Uuid, Option<Identifier>), ConnectionRecord>,
    device_states: DashMap<DeviceKey, DeviceState>,
    attributes: DashMap<(Uuid, Identifier, String), String>,
    properties: DashMap<(Uuid, PropertyAddress), PropertyRecord>,
    devices: DashMap<DeviceKey, DiscoveredDevice>,
}

impl MemoryStateStore {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            sources: DashMap::new(),
            connections: DashMap::new(),
            device_states: DashMap::new(),
            attributes: DashMap::new(),
            properties: DashMap::new(),
            devices: DashMap::new(),
        }
    }

    fn source(&self, connector: Uuid) -> String {
        self.sources
            .get(&connector)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| connector.to_string())
    }

    fn publish(&self, connector: Uuid, routing_key: RoutingKey, document: Value) -> Result<()> {
        self.publisher.publish(&self.source(connector), routing_key, document)
    }

    fn publish_property(&self, connector: Uuid, address: &PropertyAddress, record: &PropertyRecord) -> Result<()> {
        let routing_key = if address.channel.is_some() {
            RoutingKey::ChannelProperty
        } else {
            RoutingKey::DeviceProperty
        };
        let document = json!({
            "connector": connector,
            "device": address.device,
            "channel": address.channel,
            "property": address.property,
            "actual_value": record.actual,
            "expected_value": record.expected,
            "pending": record.pending,
        });
        self.publish(connector, routing_key, document)
    }

    /// Drop all state of `connector`
    pub fn clear_connector(&self, connector: Uuid) {
        self.connections.retain(|(c, _), _| *c != connector);
        self.device_states.retain(|(c, _), _| *c != connector);
        self.attributes.retain(|(c, _, _), _| *c != connector);
        self.properties.retain(|(c, _), _| *c != connector);
        self.devices.retain(|(c, _), _| *c != connector);
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl StateStore for MemoryStateStore {
    fn register_connector(&self, connector: Uuid, source: &str) {
        self.sources.insert(connector, source.to_string());
    }

    fn set_connection_state(
        &self,
        connector: Uuid,
        device: Option<&Identifier>,
        state: ConnectionState,
        reason: Option<&str>,
    ) -> Result<bool> {
        let key = (connector, device.cloned());
        if self.connections.get(&key).is_some_and(|r| r.state == state) {
            return Ok(false);
        }
        self.connections.insert(
            key,
            ConnectionRecord {
                state,
                reason: reason.map(str::to_string),
                updated_at: Utc::now(),
            },
        );

        let (routing_key, document) = match device {
            Some(device) => (
                RoutingKey::DeviceState,
                json!({"connector": connector, "device": device, "state": state, "reason": reason}),
            ),
            None => (
                RoutingKey::ConnectorState,
                json!({"connector": connector, "state": state, "reason": reason}),
            ),
        };
        self.publish(connector, routing_key, document)?;
        Ok(true)
    }

    fn connection_state(&self, connector: Uuid, device: Option<&Identifier>) -> ConnectionState {
        self.connections
            .get(&(connector, device.cloned()))
            .map(|r| r.state)
            .unwrap_or_default()
    }

    fn set_device_state(&self, connector: Uuid, device: &Identifier, state: DeviceState) -> Result<bool> {
        let previous = self.device_states.insert((connector, device.clone()), state);
        if previous == Some(state) {
            return Ok(false);
        }
        debug!("Device {} reported state {}", device, state.as_str());
        Ok(true)
    }

    fn device_state(&self, connector: Uuid, device: &Identifier) -> Option<DeviceState> {
        self.device_states.get(&(connector, device.clone())).map(|s| *s)
    }

    fn set_device_attribute(&self, connector: Uuid, device: &Identifier, attribute: &str, value: &str) -> Result<bool> {
        let key = (connector, device.clone(), attribute.to_string());
        if self.attributes.get(&key).is_some_and(|v| v.value() == value) {
            return Ok(false);
        }
        self.attributes.insert(key, value.to_string());
        self.publish(
            connector,
            RoutingKey::DeviceAttribute,
            json!({"connector": connector, "device": device, "attribute": attribute, "value": value}),
        )?;
        Ok(true)
    }

    fn device_attribute(&self, connector: Uuid, device: &Identifier, attribute: &str) -> Option<String> {
        self.attributes
            .get(&(connector, device.clone(), attribute.to_string()))
            .map(|v| v.value().clone())
    }

    fn set_property_actual(&self, connector: Uuid, address: &PropertyAddress, value: PropertyValue) -> Result<bool> {
        let record = {
            let mut entry = self.properties.entry((connector, address.clone())).or_default();
            let confirms = entry.expected.as_ref() == Some(&value);
            if entry.actual.as_ref() == Some(&value) && !confirms {
                return Ok(false);
            }
            if confirms {
                entry.expected = None;
                entry.pending = false;
            }
            entry.actual = Some(value);
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.publish_property(connector, address, &record)?;
        Ok(true)
    }

    fn set_property_expected(&self, connector: Uuid, address: &PropertyAddress, value: PropertyValue) -> Result<bool> {
        let record = {
            let mut entry = self.properties.entry((connector, address.clone())).or_default();
            if entry.expected.as_ref() == Some(&value) {
                return Ok(false);
            }
            entry.expected = Some(value);
            entry.pending = true;
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.publish_property(connector, address, &record)?;
        Ok(true)
    }

    fn property(&self, connector: Uuid, address: &PropertyAddress) -> Option<PropertyRecord> {
        self.properties
            .get(&(connector, address.clone()))
            .map(|r| r.value().clone())
    }

    fn register_device(&self, connector: Uuid, device: &DiscoveredDevice) -> Result<bool> {
        let merged = match self.devices.entry((connector, device.device().clone())) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                let before = existing.clone();
                existing.merge(device);
                if *existing == before {
                    return Ok(false);
                }
                existing.clone()
            },
            Entry::Vacant(vacant) => {
                vacant.insert(device.clone());
                device.clone()
            },
        };
        debug!("Registered discovered device {}", merged.device());
        let document = serde_json::to_value(&merged)?;
        self.publish(connector, RoutingKey::DeviceDiscovered, document)?;
        Ok(true)
    }

    fn discovered_device(&self, connector: Uuid, device: &Identifier) -> Option<DiscoveredDevice> {
        self.devices
            .get(&(connector, device.clone()))
            .map(|d| d.value().clone())
    }
}
