//! Connector orchestrator
//!
//! Owns everything one connector needs: the codec, the message queue, the
//! consumers and one transport client per managed endpoint (each device, or a
//! single shared broker session). Transport events are decoded into the queue
//! as they arrive; the queue is drained on every tick.
//!
//! ```text
//!   ClientEvent ──► codec.decode ──► MessageQueue ──► consumers ──► StateStore
//!                                                        │
//!   ClientHandle ◄── codec.encode ◄── outbound writes ◄──┘
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fb_comlink::{
    Codec, CodecRegistry, ComlinkError, ConnectionState, ConnectionStateMessage, Identifier, Message, PropertyAddress,
    PropertyValue, PropertyWriteMessage, WireFrame,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_loop::EventLoop;
use super::reconnect::ReconnectPolicy;
use crate::consumers::{ConsumerContext, ConsumerRegistry};
use crate::core::config::ConnectorConfig;
use crate::error::{ConnSrvError, Result};
use crate::queue::MessageQueue;
use crate::storage::StateStore;
use crate::transport::{ClientEvent, ClientHandle, ClientOptions, Transport, TransportClient, TransportFactory};

/// Connector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Per-device view of the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Client spawned, first connection pending
    Connecting,
    Running,
    Reconnecting,
    /// Fatal transport error; stays out of service until reconfigured
    Lost,
    /// Device configuration rejected; never connected
    Misconfigured,
    Stopped,
}

impl DeviceStatus {
    fn from_connection(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Running,
            ConnectionState::Disconnected | ConnectionState::Reconnecting => Self::Reconnecting,
            ConnectionState::Lost => Self::Lost,
            ConnectionState::Unknown => Self::Connecting,
        }
    }
}

/// Write request submitted through a [`WriteHandle`]
#[derive(Debug)]
struct WriteRequest {
    address: PropertyAddress,
    value: PropertyValue,
    reply: oneshot::Sender<Result<()>>,
}

/// Submits property writes to a running orchestrator
#[derive(Debug, Clone)]
pub struct WriteHandle {
    requests: mpsc::UnboundedSender<WriteRequest>,
}

impl WriteHandle {
    /// Queue a write. Fails when the property cannot be written or the
    /// orchestrator is gone.
    pub async fn write(&self, address: PropertyAddress, value: PropertyValue) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(WriteRequest { address, value, reply })
            .map_err(|_| ConnSrvError::state("connector orchestrator has stopped"))?;
        response
            .await
            .map_err(|_| ConnSrvError::state("connector orchestrator dropped the write"))?
    }
}

/// Drives one connector
pub struct ConnectorOrchestrator {
    config: ConnectorConfig,
    codecs: CodecRegistry,
    codec: Option<Box<dyn Codec>>,
    queue: MessageQueue,
    consumers: ConsumerRegistry,
    store: Arc<dyn StateStore>,
    transports: Arc<dyn TransportFactory>,
    event_loop: EventLoop,
    state: OrchestratorState,

    /// Keyed by device, `None` for the shared session
    clients: HashMap<Option<Identifier>, ClientHandle>,
    endpoints: HashMap<Option<Identifier>, DeviceStatus>,
    misconfigured: HashMap<Identifier, String>,
    next_poll: HashMap<Identifier, Instant>,
    next_discovery: HashMap<Option<Identifier>, Instant>,

    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    writes_tx: mpsc::UnboundedSender<WriteRequest>,
    writes_rx: mpsc::UnboundedReceiver<WriteRequest>,
}

impl fmt::Debug for ConnectorOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorOrchestrator")
            .field("connector", &self.config.name)
            .field("state", &self.state)
            .field("clients", &self.clients.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl ConnectorOrchestrator {
    pub fn new(
        config: ConnectorConfig,
        store: Arc<dyn StateStore>,
        transports: Arc<dyn TransportFactory>,
        event_loop: EventLoop,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        Self {
            queue: MessageQueue::from_config(&config.queue),
            config,
            codecs: CodecRegistry::with_defaults(),
            codec: None,
            consumers: ConsumerRegistry::with_defaults(),
            store,
            transports,
            event_loop,
            state: OrchestratorState::Stopped,
            clients: HashMap::new(),
            endpoints: HashMap::new(),
            misconfigured: HashMap::new(),
            next_poll: HashMap::new(),
            next_discovery: HashMap::new(),
            events_tx,
            events_rx,
            writes_tx,
            writes_rx,
        }
    }

    /// Replace the codec constructors
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Replace the consumers
    pub fn with_consumers(mut self, consumers: ConsumerRegistry) -> Self {
        self.consumers = consumers;
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn write_handle(&self) -> WriteHandle {
        WriteHandle {
            requests: self.writes_tx.clone(),
        }
    }

    /// Endpoint serving `device`
    fn endpoint_of(&self, device: &Identifier) -> Option<Identifier> {
        if self.config.transport.is_shared() {
            None
        } else {
            Some(device.clone())
        }
    }

    pub fn device_status(&self, device: &Identifier) -> Option<DeviceStatus> {
        if self.misconfigured.contains_key(device) {
            return Some(DeviceStatus::Misconfigured);
        }
        self.config.device(device)?;
        if self.state == OrchestratorState::Stopped {
            return Some(DeviceStatus::Stopped);
        }
        Some(
            self.endpoints
                .get(&self.endpoint_of(device))
                .copied()
                .unwrap_or(DeviceStatus::Stopped),
        )
    }

    /// Why `device` was taken out of service at start
    pub fn misconfiguration(&self, device: &Identifier) -> Option<&str> {
        self.misconfigured.get(device).map(String::as_str)
    }

    fn is_connected(&self, endpoint: &Option<Identifier>) -> bool {
        self.endpoints.get(endpoint) == Some(&DeviceStatus::Running)
    }

    /// Validate configuration, build the codec and spawn the transport
    /// clients. Devices with invalid configuration are reported as
    /// misconfigured and skipped; the rest of the connector still starts.
    pub fn start(&mut self) -> Result<()> {
        if self.state != OrchestratorState::Stopped {
            return Err(ConnSrvError::state(format!(
                "connector {} cannot start while {}",
                self.config.name, self.state
            )));
        }
        self.state = OrchestratorState::Starting;
        if let Err(e) = self.spawn_clients() {
            error!("Connector {} failed to start: {}", self.config.name, e);
            self.state = OrchestratorState::Stopped;
            return Err(e);
        }
        self.state = OrchestratorState::Running;
        info!(
            "Connector {} ({}) running with {} client(s), {} misconfigured device(s)",
            self.config.name,
            self.config.kind,
            self.clients.len(),
            self.misconfigured.len()
        );
        Ok(())
    }

    fn spawn_clients(&mut self) -> Result<()> {
        self.config.validate()?;
        self.misconfigured.clear();

        let mut valid = Vec::new();
        for device in self.config.devices.iter().filter(|d| d.enabled) {
            match device.validate(self.config.kind, &self.config.transport) {
                Ok(()) => valid.push(device.clone()),
                Err(e) => {
                    warn!("Device {} is misconfigured: {}", device.identifier, e);
                    self.misconfigured.insert(device.identifier.clone(), e.to_string());
                },
            }
        }

        let codec = self
            .codecs
            .build(self.config.kind, &self.config.codec_context(valid.iter()))?;
        debug!("Connector {} uses the {} codec", self.config.name, codec.name());
        self.store
            .register_connector(self.config.id, self.config.kind.source());

        let options = ClientOptions {
            reconnect: ReconnectPolicy::from_config(&self.config.reconnect),
            debounce_window: self.config.debounce.window(),
        };

        if self.config.transport.is_shared() {
            let transport = self.transports.create(&self.config, None, codec.subscriptions())?;
            self.spawn_client(None, transport, options);
        } else {
            for device in &valid {
                match self.transports.create(&self.config, Some(device), Vec::new()) {
                    Ok(transport) => {
                        self.spawn_client(Some(device.identifier.clone()), transport, options.clone());
                    },
                    Err(e) => {
                        warn!("Device {} has no usable transport: {}", device.identifier, e);
                        self.misconfigured.insert(device.identifier.clone(), e.to_string());
                    },
                }
            }
        }
        self.codec = Some(codec);
        Ok(())
    }

    fn spawn_client(
        &mut self,
        endpoint: Option<Identifier>,
        transport: Box<dyn Transport>,
        options: ClientOptions,
    ) {
        debug!("Spawning transport client for {}", transport.endpoint());
        let handle = TransportClient::spawn(
            &self.event_loop,
            endpoint.clone(),
            transport,
            options,
            self.events_tx.clone(),
        );
        self.endpoints.insert(endpoint.clone(), DeviceStatus::Connecting);
        self.clients.insert(endpoint, handle);
    }

    /// Decode pending transport events into the queue. Never blocks.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: ClientEvent) {
        if self.state != OrchestratorState::Running {
            return;
        }
        match event {
            ClientEvent::State {
                endpoint,
                state,
                reason,
            } => self.on_connection_state(endpoint, state, reason),
            ClientEvent::Frame { endpoint, frame } => {
                let Some(codec) = self.codec.as_mut() else {
                    return;
                };
                match codec.decode(endpoint.as_ref(), &frame) {
                    Ok(messages) => {
                        for message in messages {
                            self.queue.append(message);
                        }
                    },
                    Err(e) => warn!("Dropping frame from {:?} ({}): {}", endpoint, frame, e),
                }
            },
            ClientEvent::Fatal { endpoint, reason } => {
                error!(
                    "Connector {}: endpoint {:?} lost until reconfigured: {}",
                    self.config.name, endpoint, reason
                );
                self.endpoints.insert(endpoint, DeviceStatus::Lost);
            },
        }
    }

    fn on_connection_state(&mut self, endpoint: Option<Identifier>, state: ConnectionState, reason: Option<String>) {
        self.queue.append(Message::ConnectionState(ConnectionStateMessage::new(
            self.config.id,
            endpoint.clone(),
            state,
            reason,
        )));

        let status = DeviceStatus::from_connection(state);
        if self.endpoints.get(&endpoint) == Some(&DeviceStatus::Lost) && status != DeviceStatus::Running {
            return;
        }
        self.endpoints.insert(endpoint.clone(), status);

        let served: Vec<Identifier> = self
            .config
            .devices
            .iter()
            .filter(|d| d.enabled && !self.misconfigured.contains_key(&d.identifier))
            .filter(|d| self.endpoint_of(&d.identifier) == endpoint)
            .map(|d| d.identifier.clone())
            .collect();

        if status == DeviceStatus::Running {
            if let Some(codec) = self.codec.as_mut() {
                codec.connection_reset(endpoint.as_ref());
            }
            let now = Instant::now();
            for device in served {
                self.next_poll.insert(device, now);
            }
            if self.config.discovery.enabled {
                self.next_discovery.insert(endpoint, now);
            }
        } else {
            for device in &served {
                self.next_poll.remove(device);
            }
            self.next_discovery.remove(&endpoint);
        }
    }

    /// One orchestrator step: drain the queue through the consumers, send
    /// the resulting writes, then issue due polls and discovery probes.
    /// Returns how many messages were consumed.
    pub fn tick(&mut self) -> usize {
        if self.state != OrchestratorState::Running {
            return 0;
        }
        self.process_events();

        let mut consumed = 0;
        let mut outbound = Vec::new();
        {
            let ctx = ConsumerContext::new(&self.config, self.store.as_ref());
            while let Some(message) = self.queue.dequeue() {
                consumed += 1;
                match self.consumers.dispatch(&message, &ctx) {
                    Ok(messages) => outbound.extend(messages),
                    Err(e) => warn!("Dropping {} message: {}", message.kind(), e),
                }
            }
        }
        for message in outbound {
            self.send_outbound(&message);
        }

        let now = Instant::now();
        self.issue_polls(now);
        self.issue_discovery(now);
        consumed
    }

    fn send_outbound(&mut self, message: &Message) {
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        let frames = match codec.encode(message) {
            Ok(frames) => frames,
            Err(e) => {
                error!("Cannot encode {} message: {}", message.kind(), e);
                return;
            },
        };
        let Some(device) = message.device().cloned() else {
            warn!("Outbound {} message has no target device", message.kind());
            return;
        };
        let base_key = match message {
            Message::PropertyWrite(write) => write.address().to_string(),
            other => format!("{}:{}", device, other.kind()),
        };
        let endpoint = self.endpoint_of(&device);
        for (index, frame) in frames.into_iter().enumerate() {
            let key = if index == 0 {
                base_key.clone()
            } else {
                format!("{base_key}#{index}")
            };
            self.send_frame(&endpoint, frame, Some(key));
        }
    }

    fn send_frame(&self, endpoint: &Option<Identifier>, frame: WireFrame, key: Option<String>) {
        match self.clients.get(endpoint) {
            Some(client) => {
                if !client.send(frame, key) {
                    warn!("Transport client {:?} has stopped, frame dropped", endpoint);
                }
            },
            None => warn!("No transport client for {:?}, frame dropped", endpoint),
        }
    }

    fn issue_polls(&mut self, now: Instant) {
        let due: Vec<Identifier> = self
            .next_poll
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(device, _)| device.clone())
            .collect();
        let interval = self.config.poll_interval();

        for device in due {
            let endpoint = self.endpoint_of(&device);
            if !self.is_connected(&endpoint) {
                self.next_poll.remove(&device);
                continue;
            }
            self.next_poll.insert(device.clone(), now + interval);
            let Some(codec) = self.codec.as_mut() else {
                return;
            };
            match codec.poll_frames(&device) {
                Ok(frames) => {
                    for frame in frames {
                        self.send_frame(&endpoint, frame, None);
                    }
                },
                Err(e) => warn!("Cannot poll device {}: {}", device, e),
            }
        }
    }

    fn issue_discovery(&mut self, now: Instant) {
        if !self.config.discovery.enabled {
            return;
        }
        let due: Vec<Option<Identifier>> = self
            .next_discovery
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();

        for endpoint in due {
            if self.config.discovery.interval_ms > 0 {
                self.next_discovery.insert(
                    endpoint.clone(),
                    now + Duration::from_millis(self.config.discovery.interval_ms),
                );
            } else {
                self.next_discovery.remove(&endpoint);
            }
            let Some(codec) = self.codec.as_mut() else {
                return;
            };
            let frames = codec.discovery_frames(endpoint.as_ref());
            if !frames.is_empty() {
                debug!("Sending {} discovery frame(s) to {:?}", frames.len(), endpoint);
            }
            for frame in frames {
                self.send_frame(&endpoint, frame, None);
            }
        }
    }

    /// Queue a property write. The request is checked against the
    /// configuration up front so callers learn about bad writes immediately;
    /// the write consumer records the expected value on the next tick.
    pub fn write_property(&mut self, address: PropertyAddress, value: PropertyValue) -> Result<()> {
        if self.state != OrchestratorState::Running {
            return Err(ConnSrvError::state(format!(
                "connector {} is {}, cannot write {}",
                self.config.name, self.state, address
            )));
        }
        if let Some(reason) = self.misconfigured.get(&address.device) {
            return Err(ConnSrvError::state(format!(
                "device {} is misconfigured: {}",
                address.device, reason
            )));
        }
        let property = self
            .config
            .property(&address)
            .ok_or_else(|| ComlinkError::invalid_argument(format!("property {address} is not configured")))?;
        if !property.settable {
            return Err(ComlinkError::invalid_argument(format!("property {address} is not settable")).into());
        }
        let value = value.coerce(property.data_type, &property.format)?;
        let write = PropertyWriteMessage::new(self.config.id, address, value)?;
        self.queue.append(Message::PropertyWrite(write));
        Ok(())
    }

    /// Disconnect every client and wait for their teardown, then discard
    /// whatever is still queued. Final connection states go straight to the
    /// state store.
    pub async fn stop(&mut self) {
        if self.state == OrchestratorState::Stopped {
            return;
        }
        self.state = OrchestratorState::Stopping;
        info!("Stopping connector {}", self.config.name);

        let clients: Vec<ClientHandle> = self.clients.drain().map(|(_, client)| client).collect();
        futures::future::join_all(clients.into_iter().map(ClientHandle::shutdown)).await;

        while let Ok(event) = self.events_rx.try_recv() {
            if let ClientEvent::State {
                endpoint,
                state,
                reason,
            } = event
            {
                if let Err(e) =
                    self.store
                        .set_connection_state(self.config.id, endpoint.as_ref(), state, reason.as_deref())
                {
                    warn!("Cannot record final state of {:?}: {}", endpoint, e);
                }
            }
        }

        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!("Discarded {} queued message(s)", discarded);
        }
        self.codec = None;
        self.endpoints.clear();
        self.next_poll.clear();
        self.next_discovery.clear();
        self.state = OrchestratorState::Stopped;
        info!("Connector {} stopped", self.config.name);
    }

    /// Swap the configuration. A running connector is restarted with it,
    /// which also brings lost devices back into service.
    pub async fn reconfigure(&mut self, config: ConnectorConfig) -> Result<()> {
        let was_running = self.state != OrchestratorState::Stopped;
        self.stop().await;
        self.queue = MessageQueue::from_config(&config.queue);
        self.config = config;
        self.misconfigured.clear();
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Start, then tick until `shutdown` fires, then stop
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.start()?;
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                Some(request) = self.writes_rx.recv() => {
                    let result = self.write_property(request.address, request.value);
                    // requester may have given up
                    let _ = request.reply.send(result);
                },
                _ = ticker.tick() => {
                    self.tick();
                },
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Devices currently served by a client
    pub fn active_devices(&self) -> HashSet<Identifier> {
        self.config
            .devices
            .iter()
            .filter(|d| d.enabled && !self.misconfigured.contains_key(&d.identifier))
            .filter(|d| self.clients.contains_key(&self.endpoint_of(&d.identifier)))
            .map(|d| d.identifier.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::consumers::test_support;
    use crate::storage::{LogPublisher, MemoryStateStore};
    use crate::transport::MockTransportFactory;

    fn orchestrator(config: ConnectorConfig) -> (ConnectorOrchestrator, MockTransportFactory, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new(Arc::new(LogPublisher)));
        let factory = MockTransportFactory::new();
        let orchestrator = ConnectorOrchestrator::new(
            config,
            store.clone(),
            Arc::new(factory.clone()),
            EventLoop::try_current().unwrap(),
        );
        (orchestrator, factory, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let (mut orchestrator, factory, _store) = orchestrator(test_support::connector());
        let meter = Identifier::new("meter").unwrap();

        orchestrator.start().unwrap();
        assert_eq!(orchestrator.state(), OrchestratorState::Running);
        assert!(orchestrator.start().is_err());
        assert_eq!(orchestrator.client_count(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.tick();
        assert_eq!(orchestrator.device_status(&meter), Some(DeviceStatus::Running));
        assert!(factory.handle("meter").is_connected());

        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
        assert_eq!(orchestrator.client_count(), 0);
        assert_eq!(orchestrator.queue_len(), 0);
        assert!(!factory.handle("meter").is_connected());
        assert_eq!(orchestrator.device_status(&meter), Some(DeviceStatus::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_misconfigured_device_skipped() {
        let mut config = test_support::connector();
        let mut broken = config.devices[0].clone();
        broken.identifier = Identifier::new("broken").unwrap();
        broken.station = None;
        config.devices.push(broken);

        let (mut orchestrator, factory, _store) = orchestrator(config);
        orchestrator.start().unwrap();

        let broken = Identifier::new("broken").unwrap();
        assert_eq!(orchestrator.device_status(&broken), Some(DeviceStatus::Misconfigured));
        assert!(orchestrator.misconfiguration(&broken).is_some());
        assert_eq!(factory.keys(), vec!["meter".to_string()]);
        assert_eq!(orchestrator.active_devices().len(), 1);
        orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_rejections() {
        let (mut orchestrator, _factory, _store) = orchestrator(test_support::connector());
        let relay = PropertyAddress::channel_property("meter", "relay", "state").unwrap();
        let power = PropertyAddress::device_property("meter", "power").unwrap();

        assert!(orchestrator
            .write_property(relay.clone(), PropertyValue::Bool(true))
            .is_err());

        orchestrator.start().unwrap();
        assert!(orchestrator.write_property(power, PropertyValue::Uint(1)).is_err());
        assert!(orchestrator
            .write_property(relay.clone(), PropertyValue::String("maybe".into()))
            .is_err());
        orchestrator
            .write_property(relay, PropertyValue::Bool(true))
            .unwrap();
        assert_eq!(orchestrator.queue_len(), 1);
        orchestrator.stop().await;
    }
}
