//! MQTT broker session (rumqttc)
//!
//! One session carries every device of a broker-style connector. Outgoing
//! publishes are queued on the client and flushed while `recv` polls the
//! event loop, so the transport client must keep a `recv` in flight.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fb_comlink::{MqttPublish, QoS, WireFrame};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
};
use tokio::time::timeout;
use tracing::{debug, info};

use super::traits::{Transport, TransportError, TransportStats};
use crate::core::config::MqttConfig;

/// Time given to the DISCONNECT packet to reach the broker
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub struct MqttTransport {
    endpoint: String,
    options: MqttOptions,
    capacity: usize,
    connect_timeout: Duration,
    subscriptions: Vec<String>,
    subscription_qos: QoS,
    session: Option<(AsyncClient, EventLoop)>,
    stats: TransportStats,
}

impl fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("endpoint", &self.endpoint)
            .field("subscriptions", &self.subscriptions)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl MqttTransport {
    pub fn new(config: &MqttConfig, client_id: String, subscriptions: Vec<String>) -> Self {
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_s.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        Self {
            endpoint: format!("{}:{}", config.host, config.port),
            options,
            capacity: config.capacity.max(1),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            subscriptions,
            subscription_qos: QoS::from_u8(config.qos).unwrap_or_default(),
            session: None,
            stats: TransportStats::new(),
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(TransportError::ProtocolError(format!("broker refused session: {code:?}"))),
                };
            },
            Ok(_) => {},
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(TransportError::ProtocolError(format!("broker refused session: {code:?}")));
            },
            Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
        }
    }
}

/// Drive the event loop until the queued DISCONNECT is written
async fn flush_disconnect(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Outgoing(Outgoing::Disconnect) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn transport_type(&self) -> &str {
        "mqtt"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        debug!("Connecting to MQTT broker: {}", self.endpoint);

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), self.capacity);
        let result = match timeout(self.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no CONNACK from {} within {:?}",
                self.endpoint, self.connect_timeout
            ))),
        };
        if let Err(e) = result {
            self.stats.record_failed_connection();
            return Err(e);
        }

        for topic in &self.subscriptions {
            client
                .try_subscribe(topic.clone(), to_mqtt_qos(self.subscription_qos))
                .map_err(|e| TransportError::SendFailed(format!("subscribe {topic}: {e}")))?;
        }
        info!("MQTT session to {} established, {} subscription(s)", self.endpoint, self.subscriptions.len());

        self.session = Some((client, eventloop));
        self.stats.record_successful_connection();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some((client, mut eventloop)) = self.session.take() {
            match client.try_disconnect() {
                Ok(()) => match timeout(DISCONNECT_FLUSH_TIMEOUT, flush_disconnect(&mut eventloop)).await {
                    Ok(Ok(())) => debug!("{}: session closed", self.endpoint),
                    Ok(Err(e)) => debug!("{}: disconnect: {e}", self.endpoint),
                    Err(_) => debug!(
                        "{}: DISCONNECT not flushed within {:?}",
                        self.endpoint, DISCONNECT_FLUSH_TIMEOUT
                    ),
                },
                Err(e) => debug!("{}: disconnect: {e}", self.endpoint),
            }
            self.stats.record_disconnection();
        }
        Ok(())
    }

    async fn send(&mut self, frame: &WireFrame) -> Result<usize, TransportError> {
        let WireFrame::Mqtt(publish) = frame else {
            return Err(TransportError::UnsupportedFrame(format!(
                "MQTT carries publish frames, got {frame}"
            )));
        };
        let (client, _) = self
            .session
            .as_ref()
            .ok_or_else(|| TransportError::SendFailed("not connected".to_string()))?;
        client
            .try_publish(
                publish.topic.clone(),
                to_mqtt_qos(publish.qos),
                publish.retain,
                publish.payload.to_vec(),
            )
            .map_err(|e| TransportError::SendFailed(format!("{}: {e}", publish.topic)))?;
        self.stats.record_sent(publish.payload.len());
        Ok(publish.payload.len())
    }

    async fn recv(&mut self) -> Result<WireFrame, TransportError> {
        let (_, eventloop) = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::ReceiveFailed("not connected".to_string()))?;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.stats.record_received(publish.payload.len());
                    return Ok(WireFrame::Mqtt(MqttPublish::new(
                        publish.topic,
                        publish.payload,
                        from_mqtt_qos(publish.qos),
                        publish.retain,
                    )));
                },
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.session = None;
                    self.stats.record_disconnection();
                    return Err(TransportError::ConnectionLost(format!(
                        "{} closed the session",
                        self.endpoint
                    )));
                },
                Ok(_) => {},
                Err(e) => {
                    self.session = None;
                    self.stats.record_disconnection();
                    return Err(TransportError::ConnectionLost(e.to_string()));
                },
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one session, answers CONNECT and returns every byte sent after it
    async fn accept_one_session(listener: TcpListener) -> Vec<u8> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 2];
        socket.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x10, "expected CONNECT");
        let mut connect = vec![0u8; usize::from(header[1])];
        socket.read_exact(&mut connect).await.unwrap();
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        rest
    }

    #[test]
    fn test_qos_mapping() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn test_new_transport() {
        let config = MqttConfig {
            username: Some("fb".to_string()),
            ..MqttConfig::default()
        };
        let transport = MqttTransport::new(&config, "connsrv-test".to_string(), vec!["/fb/v1/#".to_string()]);
        assert_eq!(transport.endpoint(), "127.0.0.1:1883");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_reaches_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = MqttConfig {
            port: listener.local_addr().unwrap().port(),
            ..MqttConfig::default()
        };
        let broker = tokio::spawn(accept_one_session(listener));

        let mut transport = MqttTransport::new(&config, "connsrv-test".to_string(), Vec::new());
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());

        assert_eq!(broker.await.unwrap(), vec![0xE0, 0x00]);
        assert_eq!(transport.stats().disconnections, 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let mut transport = MqttTransport::new(&MqttConfig::default(), "connsrv-test".to_string(), Vec::new());
        transport.disconnect().await.unwrap();
        assert_eq!(transport.stats().disconnections, 0);
    }
}
