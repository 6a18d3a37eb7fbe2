//! Mock transport for testing
//!
//! Provides a scripted transport so clients and the orchestrator can be tested
//! without sockets. Tests drive it through a cloneable [`MockHandle`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fb_comlink::WireFrame;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::factory::TransportFactory;
use super::traits::{Transport, TransportError, TransportStats};
use crate::core::config::{ConnectorConfig, DeviceConfig};
use crate::error::Result;

/// Produces the replies the peer sends back for one outgoing frame
pub type Responder = Box<dyn Fn(&WireFrame) -> Vec<WireFrame> + Send>;

#[derive(Default)]
struct MockState {
    connected: bool,
    inbound: VecDeque<WireFrame>,
    sent: Vec<WireFrame>,
    connect_failures: VecDeque<TransportError>,
    connect_attempts: u32,
    drop_pending: Option<String>,
    responder: Option<Responder>,
    subscriptions: Vec<String>,
    stats: TransportStats,
}

/// Test-side view of a mock endpoint
#[derive(Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockHandle")
            .field("connected", &state.connected)
            .field("inbound", &state.inbound.len())
            .field("sent", &state.sent.len())
            .finish()
    }
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame as if the peer sent it
    pub fn push_inbound(&self, frame: WireFrame) {
        self.state.lock().inbound.push_back(frame);
        self.notify.notify_one();
    }

    /// Frames written by the client so far
    pub fn sent(&self) -> Vec<WireFrame> {
        self.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Fail the next `count` connection attempts with `error`
    pub fn fail_next_connects(&self, count: usize, error: TransportError) {
        let mut state = self.state.lock();
        state.connect_failures.extend(std::iter::repeat(error).take(count));
    }

    /// Make the pending `recv` report a lost connection
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.state.lock().drop_pending = Some(reason.into());
        self.notify.notify_one();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Answer every outgoing frame with `responder`'s frames
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&WireFrame) -> Vec<WireFrame> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }
}

/// Transport backed by a [`MockHandle`]
pub struct MockTransport {
    endpoint: String,
    handle: MockHandle,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("endpoint", &self.endpoint)
            .field("handle", &self.handle)
            .finish()
    }
}

impl MockTransport {
    pub fn new(endpoint: impl Into<String>, handle: MockHandle) -> Self {
        Self {
            endpoint: endpoint.into(),
            handle,
        }
    }

    pub fn handle(&self) -> &MockHandle {
        &self.handle
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> std::result::Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.connect_attempts += 1;
        state.stats.record_connection_attempt();
        if let Some(error) = state.connect_failures.pop_front() {
            state.stats.record_failed_connection();
            debug!("Mock {} refusing connection: {}", self.endpoint, error);
            return Err(error);
        }
        state.connected = true;
        state.drop_pending = None;
        state.stats.record_successful_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> std::result::Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        if state.connected {
            state.connected = false;
            state.stats.record_disconnection();
        }
        Ok(())
    }

    async fn send(&mut self, frame: &WireFrame) -> std::result::Result<usize, TransportError> {
        let replies = {
            let mut state = self.handle.state.lock();
            if !state.connected {
                return Err(TransportError::SendFailed("not connected".to_string()));
            }
            state.sent.push(frame.clone());
            state.stats.record_sent(frame.len());
            let replies = state.responder.as_ref().map(|r| r(frame)).unwrap_or_default();
            state.inbound.extend(replies.iter().cloned());
            replies
        };
        if !replies.is_empty() {
            self.handle.notify.notify_one();
        }
        Ok(frame.len())
    }

    async fn recv(&mut self) -> std::result::Result<WireFrame, TransportError> {
        loop {
            {
                let mut state = self.handle.state.lock();
                if !state.connected {
                    return Err(TransportError::ReceiveFailed("not connected".to_string()));
                }
                if let Some(reason) = state.drop_pending.take() {
                    state.connected = false;
                    state.stats.record_disconnection();
                    return Err(TransportError::ConnectionLost(reason));
                }
                if let Some(frame) = state.inbound.pop_front() {
                    state.stats.record_received(frame.len());
                    return Ok(frame);
                }
            }
            self.handle.notify.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    fn stats(&self) -> TransportStats {
        self.handle.state.lock().stats.clone()
    }
}

/// Hands out mock transports keyed by device identifier (`"shared"` for
/// broker sessions), reusing the handle across reconnects and restarts
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    handles: Arc<Mutex<HashMap<String, MockHandle>>>,
}

impl MockTransportFactory {
    pub const SHARED: &'static str = "shared";

    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `key`, created on first use so tests can script it early
    pub fn handle(&self, key: &str) -> MockHandle {
        self.handles.lock().entry(key.to_string()).or_default().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handles.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        _connector: &ConnectorConfig,
        device: Option<&DeviceConfig>,
        subscriptions: Vec<String>,
    ) -> Result<Box<dyn Transport>> {
        let key = device.map_or(Self::SHARED, |d| d.identifier.as_str());
        let handle = self.handle(key);
        handle.state.lock().subscriptions = subscriptions;
        Ok(Box::new(MockTransport::new(format!("mock://{key}"), handle)))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_scripted_exchange() {
        let handle = MockHandle::new();
        handle.set_responder(|frame| vec![frame.clone()]);
        let mut transport = MockTransport::new("mock://echo", handle.clone());

        assert!(transport.send(&WireFrame::Text("x".into())).await.is_err());
        transport.connect().await.unwrap();

        let frame = WireFrame::Binary(Bytes::from_static(&[1, 2, 3]));
        transport.send(&frame).await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), frame);
        assert_eq!(handle.sent(), vec![frame]);
    }

    #[tokio::test]
    async fn test_failures_and_drops() {
        let handle = MockHandle::new();
        handle.fail_next_connects(2, TransportError::ConnectionFailed("refused".into()));
        let mut transport = MockTransport::new("mock://flaky", handle.clone());

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        transport.connect().await.unwrap();
        assert_eq!(handle.connect_attempts(), 3);

        handle.drop_connection("reset by peer");
        assert!(matches!(transport.recv().await, Err(TransportError::ConnectionLost(_))));
        assert!(!transport.is_connected());
    }
}
