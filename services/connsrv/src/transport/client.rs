//! Transport client
//!
//! One task per managed endpoint. It owns the [`Transport`], reconnects with
//! backoff, coalesces keyed writes, buffers frames while the link is down and
//! reports lifecycle changes and inbound frames to the orchestrator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use fb_comlink::{ConnectionState, Identifier, WireFrame};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::{Transport, TransportError, TransportStats};
use crate::runtime::debounce::WriteDebouncer;
use crate::runtime::event_loop::EventLoop;
use crate::runtime::reconnect::{ReconnectHelper, ReconnectPolicy};

/// Frames kept while disconnected; older ones are dropped first
const MAX_PENDING_FRAMES: usize = 1024;

/// Requests from the orchestrator
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Write a frame. Frames with a key go through the debounce window,
    /// latest value per key wins.
    Send { frame: WireFrame, key: Option<String> },
    /// Release the connection and end the task
    Disconnect,
}

/// Notifications to the orchestrator. `endpoint` is `None` for a shared
/// broker session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State {
        endpoint: Option<Identifier>,
        state: ConnectionState,
        reason: Option<String>,
    },
    Frame {
        endpoint: Option<Identifier>,
        frame: WireFrame,
    },
    /// Retrying cannot help; the client stays idle until torn down
    Fatal {
        endpoint: Option<Identifier>,
        reason: String,
    },
}

/// Owner side of a running client
#[derive(Debug)]
pub struct ClientHandle {
    endpoint: Option<Identifier>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<TransportStats>>,
}

impl ClientHandle {
    pub fn endpoint(&self) -> Option<&Identifier> {
        self.endpoint.as_ref()
    }

    /// Queue a frame; returns false when the client task has ended
    pub fn send(&self, frame: WireFrame, key: Option<String>) -> bool {
        self.commands.send(ClientCommand::Send { frame, key }).is_ok()
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Disconnect and wait for teardown to finish
    pub async fn shutdown(self) {
        // a finished task no longer listens; cancellation covers in-flight work
        let _ = self.commands.send(ClientCommand::Disconnect);
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("Transport client {:?} panicked: {}", self.endpoint, e);
        }
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub reconnect: ReconnectPolicy,
    pub debounce_window: Duration,
}

enum Step {
    Cancelled,
    Command(Option<ClientCommand>),
    Retry,
    Flush,
    Frame(Result<WireFrame, TransportError>),
}

pub struct TransportClient {
    endpoint: Option<Identifier>,
    transport: Box<dyn Transport>,
    reconnect: ReconnectHelper,
    debouncer: WriteDebouncer<WireFrame>,
    pending: VecDeque<WireFrame>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
    stats: Arc<Mutex<TransportStats>>,
    retry_at: Option<Instant>,
    last_state: ConnectionState,
    fatal: bool,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl TransportClient {
    /// Spawn the client on `event_loop`. The first connection attempt starts
    /// immediately.
    pub fn spawn(
        event_loop: &EventLoop,
        endpoint: Option<Identifier>,
        transport: Box<dyn Transport>,
        options: ClientOptions,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> ClientHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = event_loop.child_token();
        let stats = Arc::new(Mutex::new(transport.stats()));

        let client = TransportClient {
            endpoint: endpoint.clone(),
            transport,
            reconnect: ReconnectHelper::new(options.reconnect),
            debouncer: WriteDebouncer::new(options.debounce_window),
            pending: VecDeque::new(),
            commands: commands_rx,
            events,
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
            retry_at: Some(Instant::now()),
            last_state: ConnectionState::Unknown,
            fatal: false,
        };
        let join = event_loop.spawn(client.run());

        ClientHandle {
            endpoint,
            commands: commands_tx,
            cancel,
            join,
            stats,
        }
    }

    fn label(&self) -> String {
        match &self.endpoint {
            Some(device) => format!("{device}@{}", self.transport.endpoint()),
            None => self.transport.endpoint().to_string(),
        }
    }

    fn emit(&self, event: ClientEvent) {
        // receiver gone means the orchestrator is stopping
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ConnectionState, reason: Option<String>) {
        if self.last_state == state {
            return;
        }
        self.last_state = state;
        self.emit(ClientEvent::State {
            endpoint: self.endpoint.clone(),
            state,
            reason,
        });
    }

    async fn run(mut self) {
        loop {
            let connected = self.transport.is_connected();
            let retry_at = self.retry_at;
            let flush_at = self.debouncer.next_deadline();

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                command = self.commands.recv() => Step::Command(command),
                _ = sleep_until_opt(retry_at), if !connected && retry_at.is_some() => Step::Retry,
                _ = sleep_until_opt(flush_at), if connected && flush_at.is_some() => Step::Flush,
                frame = self.transport.recv(), if connected => Step::Frame(frame),
            };

            match step {
                Step::Cancelled | Step::Command(None) | Step::Command(Some(ClientCommand::Disconnect)) => break,
                Step::Command(Some(ClientCommand::Send { frame, key })) => self.on_send(frame, key).await,
                Step::Retry => self.try_connect().await,
                Step::Flush => {
                    for frame in self.debouncer.take_due(Instant::now()) {
                        self.send_now(frame).await;
                    }
                },
                Step::Frame(Ok(frame)) => {
                    debug!("{}: received {}", self.label(), frame);
                    self.emit(ClientEvent::Frame {
                        endpoint: self.endpoint.clone(),
                        frame,
                    });
                },
                Step::Frame(Err(e)) => self.on_lost(e),
            }
            *self.stats.lock() = self.transport.stats();
        }

        self.teardown().await;
    }

    async fn on_send(&mut self, frame: WireFrame, key: Option<String>) {
        if self.fatal {
            warn!("{}: endpoint out of service, dropping {}", self.label(), frame);
            return;
        }
        match key {
            Some(key) if self.debouncer.is_enabled() => self.debouncer.push(key, frame),
            _ if self.transport.is_connected() => self.send_now(frame).await,
            _ => self.buffer(frame),
        }
    }

    fn buffer(&mut self, frame: WireFrame) {
        if self.pending.len() >= MAX_PENDING_FRAMES {
            if let Some(dropped) = self.pending.pop_front() {
                warn!("{}: pending buffer full, dropping {}", self.label(), dropped);
            }
        }
        self.pending.push_back(frame);
    }

    async fn send_now(&mut self, frame: WireFrame) {
        match self.transport.send(&frame).await {
            Ok(len) => debug!("{}: sent {} bytes", self.label(), len),
            Err(e) if !self.transport.is_connected() => {
                self.buffer(frame);
                self.on_lost(e);
            },
            Err(e) => warn!("{}: dropping {}: {}", self.label(), frame, e),
        }
    }

    async fn try_connect(&mut self) {
        self.retry_at = None;
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.transport.connect() => result,
        };

        match result {
            Ok(()) => {
                info!("{}: connected", self.label());
                self.reconnect.mark_connected();
                self.set_state(ConnectionState::Connected, None);
                while let Some(frame) = self.pending.pop_front() {
                    self.send_now(frame).await;
                    if !self.transport.is_connected() {
                        break;
                    }
                }
            },
            Err(e) if e.is_fatal() => self.on_fatal(e),
            Err(e) => {
                self.reconnect.record_failure();
                match self.reconnect.next_delay() {
                    Some(delay) => {
                        warn!(
                            "{}: connection attempt {} failed: {}, retrying in {:?}",
                            self.label(),
                            self.reconnect.failures(),
                            e,
                            delay
                        );
                        self.retry_at = Some(Instant::now() + delay);
                        self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                    },
                    None => self.on_fatal(TransportError::ConnectionFailed(format!(
                        "giving up after {} attempts: {e}",
                        self.reconnect.failures()
                    ))),
                }
            },
        }
    }

    fn on_lost(&mut self, error: TransportError) {
        if error.is_fatal() {
            self.on_fatal(error);
            return;
        }
        warn!("{}: connection lost: {}", self.label(), error);
        self.reconnect.record_failure();
        let delay = self.reconnect.next_delay().unwrap_or_default();
        self.retry_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Reconnecting, Some(error.to_string()));
    }

    fn on_fatal(&mut self, error: TransportError) {
        error!("{}: {}, endpoint taken out of service", self.label(), error);
        self.fatal = true;
        self.retry_at = None;
        let dropped = self.debouncer.clear() + self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            warn!("{}: discarded {} pending writes", self.label(), dropped);
        }
        self.set_state(ConnectionState::Lost, Some(error.to_string()));
        self.emit(ClientEvent::Fatal {
            endpoint: self.endpoint.clone(),
            reason: error.to_string(),
        });
    }

    async fn teardown(&mut self) {
        let dropped = self.debouncer.clear() + self.pending.len();
        self.pending.clear();
        self.retry_at = None;
        if dropped > 0 {
            debug!("{}: discarded {} pending writes on disconnect", self.label(), dropped);
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("{}: disconnect failed: {}", self.label(), e);
        }
        *self.stats.lock() = self.transport.stats();
        if self.last_state != ConnectionState::Lost {
            self.set_state(ConnectionState::Disconnected, None);
        }
        info!("{}: transport client stopped", self.label());
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::mock::{MockHandle, MockTransport};

    fn options(window_ms: u64) -> ClientOptions {
        ClientOptions {
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            debounce_window: Duration::from_millis(window_ms),
        }
    }

    fn spawn(
        handle: &MockHandle,
        window_ms: u64,
    ) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let event_loop = EventLoop::new(tokio::runtime::Handle::current(), CancellationToken::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Box::new(MockTransport::new("mock://dev", handle.clone()));
        let device = Some(Identifier::new("dev").unwrap());
        (TransportClient::spawn(&event_loop, device, transport, options(window_ms), tx), rx)
    }

    fn state_of(event: &ClientEvent) -> Option<ConnectionState> {
        match event {
            ClientEvent::State { state, .. } => Some(*state),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_receive() {
        let handle = MockHandle::new();
        let (client, mut events) = spawn(&handle, 0);

        let event = events.recv().await.unwrap();
        assert_eq!(state_of(&event), Some(ConnectionState::Connected));

        handle.push_inbound(WireFrame::Text("hello".into()));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ClientEvent::Frame { frame: WireFrame::Text(ref t), .. } if t == "hello"));

        client.shutdown().await;
        let event = events.recv().await.unwrap();
        assert_eq!(state_of(&event), Some(ConnectionState::Disconnected));
        assert!(!handle.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_connect() {
        let handle = MockHandle::new();
        handle.fail_next_connects(3, TransportError::ConnectionFailed("refused".into()));
        let start = Instant::now();
        let (client, mut events) = spawn(&handle, 0);

        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Disconnected));
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Connected));
        assert_eq!(handle.connect_attempts(), 4);
        // 100 + 200 + 400 ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(700));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_writes_coalesce() {
        let handle = MockHandle::new();
        let (client, mut events) = spawn(&handle, 2000);
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Connected));

        client.send(WireFrame::Text("v1".into()), Some("relay".into()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        client.send(WireFrame::Text("v2".into()), Some("relay".into()));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(handle.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(handle.sent(), vec![WireFrame::Text("v2".into())]);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_writes() {
        let handle = MockHandle::new();
        let (client, mut events) = spawn(&handle, 2000);
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Connected));

        client.send(WireFrame::Text("late".into()), Some("relay".into()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.shutdown().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_reconnects_and_flushes() {
        let handle = MockHandle::new();
        let (client, mut events) = spawn(&handle, 0);
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Connected));

        handle.fail_next_connects(1, TransportError::ConnectionFailed("refused".into()));
        handle.drop_connection("reset by peer");
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Reconnecting));

        client.send(WireFrame::Text("queued".into()), None);
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Disconnected));
        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Connected));
        assert_eq!(handle.sent(), vec![WireFrame::Text("queued".into())]);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_retrying() {
        let handle = MockHandle::new();
        handle.fail_next_connects(1, TransportError::ProtocolError("bad credentials".into()));
        let (client, mut events) = spawn(&handle, 0);

        assert_eq!(state_of(&events.recv().await.unwrap()), Some(ConnectionState::Lost));
        assert!(matches!(events.recv().await.unwrap(), ClientEvent::Fatal { .. }));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.connect_attempts(), 1);
        client.shutdown().await;
    }
}
