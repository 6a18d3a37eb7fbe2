//! Connector runtime
//!
//! Scheduling pieces shared by the transport clients and the orchestrator:
//! the explicit [`EventLoop`] handle, reconnect backoff, write debouncing,
//! the per-connector [`ConnectorOrchestrator`] and the service lifecycle.

pub mod debounce;
pub mod event_loop;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconnect;

pub use debounce::WriteDebouncer;
pub use event_loop::EventLoop;
pub use lifecycle::{wait_for_shutdown, ConnectorService};
pub use orchestrator::{ConnectorOrchestrator, DeviceStatus, OrchestratorState, WriteHandle};
pub use reconnect::{ReconnectHelper, ReconnectPolicy};
