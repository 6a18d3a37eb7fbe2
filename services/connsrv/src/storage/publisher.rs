//! State document publishers
//!
//! The state store hands every change to a [`Publisher`]. Publishing must not
//! block the connector loop, so implementations either forward to a channel
//! or log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::routing::RoutingKey;
use crate::error::{ConnSrvError, Result};

/// One document bound for the exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedDocument {
    pub source: String,
    pub routing_key: RoutingKey,
    pub document: Value,
    pub published_at: DateTime<Utc>,
}

/// Publisher trait
pub trait Publisher: Send + Sync {
    fn publish(&self, source: &str, routing_key: RoutingKey, document: Value) -> Result<()>;
}

/// Forwards documents to a bridge task over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<PublishedDocument>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedDocument>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, source: &str, routing_key: RoutingKey, document: Value) -> Result<()> {
        debug!("Publishing {} from {}", routing_key, source);
        self.tx
            .send(PublishedDocument {
                source: source.to_string(),
                routing_key,
                document,
                published_at: Utc::now(),
            })
            .map_err(|_| ConnSrvError::storage("publisher channel closed"))
    }
}

/// Writes documents to the log; used when no bridge is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, source: &str, routing_key: RoutingKey, document: Value) -> Result<()> {
        info!(source, routing_key = routing_key.as_str(), %document, "state document");
        Ok(())
    }
}
