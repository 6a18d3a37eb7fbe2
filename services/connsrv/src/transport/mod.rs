//! Transport Layer Module
//!
//! Separates physical communication from protocol logic. A [`Transport`]
//! moves [`fb_comlink::WireFrame`]s over one connection; the
//! [`TransportClient`] task wraps it with reconnection, write debouncing and
//! lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Connector Orchestrator                     │
//! │  (codec, queue, consumers)                              │
//! └─────────────────────────────────────────────────────────┘
//!              │ ClientCommand          ▲ ClientEvent
//!              ▼                        │
//! ┌─────────────────────────────────────────────────────────┐
//! │              Transport Client (task)                    │
//! │  backoff, debounce, pending buffer                      │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!     ┌───────────────┬───────┴───────┬───────────────┐
//!     ▼               ▼               ▼               ▼
//! ┌─────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │   TCP   │   │   MQTT    │   │ WebSocket │   │   Mock   │
//! └─────────┘   └───────────┘   └───────────┘   └──────────┘
//! ```

pub mod client;
pub mod factory;
pub mod mock;
pub mod mqtt;
pub mod tcp;
pub mod traits;
pub mod websocket;

pub use client::{ClientCommand, ClientEvent, ClientHandle, ClientOptions, TransportClient};
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use mock::{MockHandle, MockTransport, MockTransportFactory};
pub use traits::{Transport, TransportError, TransportStats};
