//! FastyBird MQTT convention v1
//!
//! Devices publish their state and attributes under `/fb/v1/<device>/...`;
//! the connector writes properties through `/set` topics.

pub mod codec;
pub mod topic;

pub use codec::FbMqttCodec;
pub use topic::{ParsedTopic, TopicGrammar, TopicKind};
