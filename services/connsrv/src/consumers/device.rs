use fb_comlink::{ConnectionState, Message, MessageKind};
use tracing::debug;

use super::{Consumer, ConsumerContext};
use crate::error::{ConnSrvError, Result};

/// Stores the `$state` a device reports about itself
#[derive(Debug, Default)]
pub struct DeviceStateConsumer;

impl Consumer for DeviceStateConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::DeviceState
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::DeviceState(event) = message else {
            return Err(ConnSrvError::internal(format!(
                "device state consumer got a {} message",
                message.kind()
            )));
        };
        if !ctx.accepts_device(event.device()) {
            debug!("Ignoring state of unknown device {}", event.device());
            return Ok(Vec::new());
        }

        ctx.store
            .set_device_state(ctx.connector(), event.device(), event.state())?;

        // Init has no connection meaning yet
        let connection = event.state().to_connection_state();
        if connection != ConnectionState::Unknown {
            ctx.store.set_connection_state(
                ctx.connector(),
                Some(event.device()),
                connection,
                Some(event.state().as_str()),
            )?;
        }
        Ok(Vec::new())
    }
}

/// Stores device attributes (`$name`, `$hw-model`, ...)
#[derive(Debug, Default)]
pub struct DeviceAttributeConsumer;

impl Consumer for DeviceAttributeConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::DeviceAttribute
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::DeviceAttribute(event) = message else {
            return Err(ConnSrvError::internal(format!(
                "device attribute consumer got a {} message",
                message.kind()
            )));
        };
        if !ctx.accepts_device(event.device()) {
            debug!("Ignoring attribute {} of unknown device {}", event.attribute(), event.device());
            return Ok(Vec::new());
        }
        ctx.store
            .set_device_attribute(ctx.connector(), event.device(), event.attribute(), event.value())?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::consumers::test_support;
    use crate::storage::{RoutingKey, StateStore};
    use fb_comlink::{DeviceAttributeMessage, DeviceState, DeviceStateMessage, Identifier};

    #[test]
    fn test_device_state_updates_connection() {
        let config = test_support::connector();
        let (store, mut rx) = test_support::store();
        let ctx = ConsumerContext::new(&config, &store);
        let device = Identifier::new("meter").unwrap();

        let init = Message::DeviceState(DeviceStateMessage::new(config.id, device.clone(), DeviceState::Init));
        DeviceStateConsumer.consume(&init, &ctx).unwrap();
        assert_eq!(store.device_state(config.id, &device), Some(DeviceState::Init));
        assert_eq!(store.connection_state(config.id, Some(&device)), ConnectionState::Unknown);
        assert!(rx.try_recv().is_err());

        let ready = Message::DeviceState(DeviceStateMessage::new(config.id, device.clone(), DeviceState::Ready));
        DeviceStateConsumer.consume(&ready, &ctx).unwrap();
        DeviceStateConsumer.consume(&ready, &ctx).unwrap();
        assert_eq!(store.connection_state(config.id, Some(&device)), ConnectionState::Connected);
        assert_eq!(rx.try_recv().unwrap().routing_key, RoutingKey::DeviceState);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_device_skipped_without_discovery() {
        let mut config = test_support::connector();
        let (store, _rx) = test_support::store();
        let stranger = Identifier::new("stranger").unwrap();
        let message = Message::DeviceState(DeviceStateMessage::new(config.id, stranger.clone(), DeviceState::Ready));

        DeviceStateConsumer
            .consume(&message, &ConsumerContext::new(&config, &store))
            .unwrap();
        assert_eq!(store.device_state(config.id, &stranger), None);

        config.discovery.enabled = true;
        DeviceStateConsumer
            .consume(&message, &ConsumerContext::new(&config, &store))
            .unwrap();
        assert_eq!(store.device_state(config.id, &stranger), Some(DeviceState::Ready));
    }

    #[test]
    fn test_attribute_stored() {
        let config = test_support::connector();
        let (store, mut rx) = test_support::store();
        let ctx = ConsumerContext::new(&config, &store);
        let device = Identifier::new("meter").unwrap();
        let message = Message::DeviceAttribute(
            DeviceAttributeMessage::new(config.id, device.clone(), "hw-model", "SDM120").unwrap(),
        );

        DeviceAttributeConsumer.consume(&message, &ctx).unwrap();
        DeviceAttributeConsumer.consume(&message, &ctx).unwrap();
        assert_eq!(
            store.device_attribute(config.id, &device, "hw-model").as_deref(),
            Some("SDM120")
        );
        assert_eq!(rx.try_recv().unwrap().document["value"], "SDM120");
        assert!(rx.try_recv().is_err());
    }
}
