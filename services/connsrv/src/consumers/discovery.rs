use fb_comlink::{Message, MessageKind};
use tracing::{debug, info};

use super::{Consumer, ConsumerContext};
use crate::error::{ConnSrvError, Result};

/// Registers devices announced on the wire
#[derive(Debug, Default)]
pub struct DiscoveryConsumer;

impl Consumer for DiscoveryConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::DeviceDiscovered
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::DeviceDiscovered(device) = message else {
            return Err(ConnSrvError::internal(format!(
                "discovery consumer got a {} message",
                message.kind()
            )));
        };
        if !ctx.discovery_enabled() {
            debug!("Discovery disabled, ignoring device {}", device.device());
            return Ok(Vec::new());
        }
        if ctx.store.register_device(ctx.connector(), device)? {
            info!(
                "Discovered device {} ({} properties, {} channels)",
                device.device(),
                device.properties().len(),
                device.channels().len()
            );
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::consumers::test_support;
    use crate::storage::{RoutingKey, StateStore};
    use fb_comlink::{DiscoveredDevice, Identifier};

    #[test]
    fn test_registers_when_enabled() {
        let mut config = test_support::connector();
        let (store, mut rx) = test_support::store();
        let device = Identifier::new("shellyplus1-a8032ab12345").unwrap();
        let message = Message::DeviceDiscovered(
            DiscoveredDevice::new(config.id, device.clone()).with_model("SNSW-001X16EU"),
        );

        DiscoveryConsumer
            .consume(&message, &ConsumerContext::new(&config, &store))
            .unwrap();
        assert!(store.discovered_device(config.id, &device).is_none());

        config.discovery.enabled = true;
        let ctx = ConsumerContext::new(&config, &store);
        DiscoveryConsumer.consume(&message, &ctx).unwrap();
        DiscoveryConsumer.consume(&message, &ctx).unwrap();
        assert_eq!(
            store.discovered_device(config.id, &device).unwrap().model(),
            Some("SNSW-001X16EU")
        );
        assert_eq!(rx.try_recv().unwrap().routing_key, RoutingKey::DeviceDiscovered);
        assert!(rx.try_recv().is_err());
    }
}
