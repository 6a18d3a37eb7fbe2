//! Message consumers
//!
//! One consumer per [`MessageKind`]. The orchestrator drains the queue each
//! tick and routes every message through the [`ConsumerRegistry`]. Consumers
//! only write to the state store and may hand back outbound messages.

mod connection;
mod device;
mod discovery;
mod property;

pub use connection::ConnectionStateConsumer;
pub use device::{DeviceAttributeConsumer, DeviceStateConsumer};
pub use discovery::DiscoveryConsumer;
pub use property::{PropertyStateConsumer, PropertyWriteConsumer};

use std::collections::HashMap;

use fb_comlink::{Identifier, Message, MessageKind};
use tracing::warn;
use uuid::Uuid;

use crate::core::config::ConnectorConfig;
use crate::error::Result;
use crate::storage::StateStore;

/// What a consumer may see while handling one message
pub struct ConsumerContext<'a> {
    pub config: &'a ConnectorConfig,
    pub store: &'a dyn StateStore,
}

impl<'a> ConsumerContext<'a> {
    pub fn new(config: &'a ConnectorConfig, store: &'a dyn StateStore) -> Self {
        Self { config, store }
    }

    pub fn connector(&self) -> Uuid {
        self.config.id
    }

    pub fn discovery_enabled(&self) -> bool {
        self.config.discovery.enabled
    }

    /// Configured devices, plus anything while discovery is on
    pub fn accepts_device(&self, device: &Identifier) -> bool {
        self.config.device(device).is_some() || self.discovery_enabled()
    }
}

/// Message handler for one kind
pub trait Consumer: Send + Sync {
    fn kind(&self) -> MessageKind;

    /// Apply `message`. Must be idempotent for repeated delivery of the same
    /// state. Returned messages are sent to the devices.
    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>>;
}

/// Routes messages to the consumer registered for their kind
pub struct ConsumerRegistry {
    consumers: HashMap<MessageKind, Box<dyn Consumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            consumers: HashMap::new(),
        }
    }

    /// Registry with the built-in consumers for every message kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ConnectionStateConsumer));
        registry.register(Box::new(DeviceStateConsumer));
        registry.register(Box::new(DeviceAttributeConsumer));
        registry.register(Box::new(PropertyStateConsumer));
        registry.register(Box::new(PropertyWriteConsumer));
        registry.register(Box::new(DiscoveryConsumer));
        registry
    }

    /// Register `consumer`, replacing any consumer of the same kind
    pub fn register(&mut self, consumer: Box<dyn Consumer>) {
        self.consumers.insert(consumer.kind(), consumer);
    }

    pub fn contains(&self, kind: MessageKind) -> bool {
        self.consumers.contains_key(&kind)
    }

    /// Hand `message` to its consumer. Kinds without a consumer are dropped.
    pub fn dispatch(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        match self.consumers.get(&message.kind()) {
            Some(consumer) => consumer.consume(message, ctx),
            None => {
                warn!("No consumer for {} messages, dropping", message.kind());
                Ok(Vec::new())
            },
        }
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}


#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use fb_comlink::{DeviceStateMessage, DeviceState, Identifier};

    struct Recording;

    impl Consumer for Recording {
        fn kind(&self) -> MessageKind {
            MessageKind::DeviceState
        }

        fn consume(&self, _message: &Message, _ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
            Err(crate::error::ConnSrvError::internal("replaced consumer called"))
        }
    }

    #[test]
    fn test_registry_routing() {
        let config = test_support::connector();
        let (store, _rx) = test_support::store();
        let ctx = ConsumerContext::new(&config, &store);
        let message = Message::DeviceState(DeviceStateMessage::new(
            config.id,
            Identifier::new("meter").unwrap(),
            DeviceState::Ready,
        ));

        let registry = ConsumerRegistry::with_defaults();
        assert!(registry.dispatch(&message, &ctx).unwrap().is_empty());

        let mut registry = ConsumerRegistry::new();
        assert!(registry.dispatch(&message, &ctx).unwrap().is_empty());
        registry.register(Box::new(Recording));
        assert!(registry.contains(MessageKind::DeviceState));
        assert!(registry.dispatch(&message, &ctx).is_err());
    }
}
