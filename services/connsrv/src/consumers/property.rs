use fb_comlink::{ComlinkError, Message, MessageKind};
use tracing::{debug, warn};

use super::{Consumer, ConsumerContext};
use crate::error::{ConnSrvError, Result};

/// Stores values reported by devices
///
/// Configured properties are coerced into their data type first. Values of
/// unknown properties are kept as received while discovery is enabled and
/// ignored otherwise.
#[derive(Debug, Default)]
pub struct PropertyStateConsumer;

impl Consumer for PropertyStateConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::PropertyState
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::PropertyState(event) = message else {
            return Err(ConnSrvError::internal(format!(
                "property state consumer got a {} message",
                message.kind()
            )));
        };
        let address = event.address();

        let value = match ctx.config.property(address) {
            Some(property) => match event.value().coerce(property.data_type, &property.format) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Dropping value of {}: {}", address, e);
                    return Ok(Vec::new());
                },
            },
            None if ctx.discovery_enabled() => event.value().clone(),
            None => {
                debug!("Ignoring value of unconfigured property {}", address);
                return Ok(Vec::new());
            },
        };

        ctx.store.set_property_actual(ctx.connector(), address, value)?;
        Ok(Vec::new())
    }
}

/// Validates write requests and hands them back for sending
#[derive(Debug, Default)]
pub struct PropertyWriteConsumer;

impl Consumer for PropertyWriteConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::PropertyWrite
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::PropertyWrite(write) = message else {
            return Err(ConnSrvError::internal(format!(
                "property write consumer got a {} message",
                message.kind()
            )));
        };
        let address = write.address();

        let property = ctx
            .config
            .property(address)
            .ok_or_else(|| ComlinkError::invalid_argument(format!("property {address} is not configured")))?;
        if !property.settable {
            return Err(ComlinkError::invalid_argument(format!("property {address} is not settable")).into());
        }
        let value = write.value().coerce(property.data_type, &property.format)?;

        ctx.store
            .set_property_expected(ctx.connector(), address, value.clone())?;
        debug!("Write {} = {} accepted", address, value);
        Ok(vec![Message::PropertyWrite(write.with_value(value)?)])
    }
}
