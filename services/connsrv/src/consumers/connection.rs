use fb_comlink::{Message, MessageKind};

use super::{Consumer, ConsumerContext};
use crate::error::{ConnSrvError, Result};

/// Copies transport lifecycle changes into the state store
#[derive(Debug, Default)]
pub struct ConnectionStateConsumer;

impl Consumer for ConnectionStateConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::ConnectionState
    }

    fn consume(&self, message: &Message, ctx: &ConsumerContext<'_>) -> Result<Vec<Message>> {
        let Message::ConnectionState(event) = message else {
            return Err(ConnSrvError::internal(format!(
                "connection state consumer got a {} message",
                message.kind()
            )));
        };
        ctx.store
            .set_connection_state(ctx.connector(), event.device(), event.state(), event.reason())?;
        Ok(Vec::new())
    }
}
