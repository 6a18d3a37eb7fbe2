//! FastyBird Device Connector Service Library (connsrv)
//!
//! Runs device connectors: each one talks to physical or cloud devices over
//! TCP, MQTT or WebSocket, decodes vendor wire formats with
//! [`fb_comlink`] codecs, queues the typed messages and reconciles device,
//! channel and property state into a state store.
//!
//! # Architecture
//!
//! - **`transport`**: connections and the reconnecting, debouncing transport client
//! - **`queue`**: FIFO between codecs and consumers
//! - **`consumers`**: one handler per message kind
//! - **`storage`**: state store and state document publishing
//! - **`runtime`**: event loop handle, backoff, debouncer, orchestrator, service lifecycle
//! - **`core`**: command line and figment configuration
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ TransportClient │───►│  Codec.decode   │───►│  MessageQueue   │
//! │ (TCP/MQTT/WS)   │    │  (fb-comlink)   │    │     (FIFO)      │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          ▲                                             │
//!          │                                             ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  debounced      │◄───│  Codec.encode   │◄───│   Consumers     │
//! │  writes         │    │                 │    │ → StateStore    │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```

pub mod consumers;
pub mod core;
pub mod error;
pub mod logging;
pub mod queue;
pub mod runtime;
pub mod storage;
pub mod transport;

pub use crate::core::config::{AppConfig, ConfigLoader, ConnectorConfig, DeviceConfig};
pub use consumers::{Consumer, ConsumerContext, ConsumerRegistry};
pub use error::{ConnSrvError, Result};
pub use queue::MessageQueue;
pub use runtime::{
    wait_for_shutdown, ConnectorOrchestrator, ConnectorService, DeviceStatus, EventLoop, OrchestratorState,
    WriteHandle,
};
pub use storage::{MemoryStateStore, StateStore};
pub use transport::{DefaultTransportFactory, MockTransportFactory, TransportFactory};
