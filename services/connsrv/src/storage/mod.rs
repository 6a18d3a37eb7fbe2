//! Connector state store
//!
//! Consumers reconcile decoded messages into the store; every change is
//! published as a state document. Writes that do not change anything are
//! no-ops, which makes repeated delivery of the same state harmless.

mod memory;
mod publisher;
mod routing;
mod types;

pub use memory::MemoryStateStore;
pub use publisher::{ChannelPublisher, LogPublisher, PublishedDocument, Publisher};
pub use routing::RoutingKey;
pub use types::{ConnectionRecord, PropertyRecord};

use fb_comlink::{ConnectionState, DeviceState, DiscoveredDevice, Identifier, PropertyAddress, PropertyValue};
use uuid::Uuid;

use crate::error::Result;

/// State storage trait
///
/// `set_*` methods return whether the stored state changed.
pub trait StateStore: Send + Sync {
    /// Source name used when publishing documents of `connector`
    fn register_connector(&self, connector: Uuid, source: &str);

    /// `device == None` addresses the connector itself
    fn set_connection_state(
        &self,
        connector: Uuid,
        device: Option<&Identifier>,
        state: ConnectionState,
        reason: Option<&str>,
    ) -> Result<bool>;

    fn connection_state(&self, connector: Uuid, device: Option<&Identifier>) -> ConnectionState;

    fn set_device_state(&self, connector: Uuid, device: &Identifier, state: DeviceState) -> Result<bool>;

    fn device_state(&self, connector: Uuid, device: &Identifier) -> Option<DeviceState>;

    fn set_device_attribute(&self, connector: Uuid, device: &Identifier, attribute: &str, value: &str) -> Result<bool>;

    fn device_attribute(&self, connector: Uuid, device: &Identifier, attribute: &str) -> Option<String>;

    /// Value reported by the device. Confirms a matching expected value.
    fn set_property_actual(&self, connector: Uuid, address: &PropertyAddress, value: PropertyValue) -> Result<bool>;

    /// Value requested by a write
    fn set_property_expected(&self, connector: Uuid, address: &PropertyAddress, value: PropertyValue) -> Result<bool>;

    fn property(&self, connector: Uuid, address: &PropertyAddress) -> Option<PropertyRecord>;

    /// Register or merge a discovered device
    fn register_device(&self, connector: Uuid, device: &DiscoveredDevice) -> Result<bool>;

    fn discovered_device(&self, connector: Uuid, device: &Identifier) -> Option<DiscoveredDevice>;
}
