//! Shared fixtures for connector scenario tests
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use connsrv::core::config::{
    ChannelConfig, ConnectorConfig, DeviceConfig, MqttConfig, PropertyConfig, TcpConfig, TransportConfig,
    WebSocketConfig,
};
use connsrv::runtime::{ConnectorOrchestrator, EventLoop};
use connsrv::storage::{ChannelPublisher, MemoryStateStore, PublishedDocument};
use connsrv::MockTransportFactory;
use fb_comlink::modbus::{RegisterKind, RegisterSpec};
use fb_comlink::{ConnectorKind, DataType, Identifier, MqttPublish, QoS, WireFrame};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn id(raw: &str) -> Identifier {
    Identifier::new(raw).unwrap()
}

/// Modbus meter on station 1: settable relay coil 0, power on input register 10
pub fn modbus_connector() -> ConnectorConfig {
    let mut relay = PropertyConfig::new(id("state"), DataType::Bool);
    relay.settable = true;
    relay.register = Some(RegisterSpec::new(RegisterKind::Coil, 0));

    let mut power = PropertyConfig::new(id("power"), DataType::Uint16);
    power.register = Some(RegisterSpec::new(RegisterKind::Input, 10));

    let mut channel = ChannelConfig::new(id("relay"));
    channel.properties.push(relay);

    let mut device = DeviceConfig::new(id("meter"));
    device.endpoint = Some("192.168.1.50".to_string());
    device.station = Some(1);
    device.channels.push(channel);
    device.properties.push(power);

    let mut config = ConnectorConfig::new("modbus", ConnectorKind::Modbus, TransportConfig::Tcp(TcpConfig::default()));
    config.devices.push(device);
    config
}

/// FastyBird MQTT lamp with a settable relay switch
pub fn mqtt_connector() -> ConnectorConfig {
    let mut switch = PropertyConfig::new(id("switch"), DataType::Bool);
    switch.settable = true;

    let mut channel = ChannelConfig::new(id("relay"));
    channel.properties.push(switch);

    let mut device = DeviceConfig::new(id("lamp"));
    device.channels.push(channel);

    let mut config = ConnectorConfig::new(
        "fb-mqtt",
        ConnectorKind::FbMqtt,
        TransportConfig::Mqtt(MqttConfig::default()),
    );
    config.devices.push(device);
    config
}

pub const SHELLY_DEVICE: &str = "shellyplus1-a8032ab12345";

/// Shelly Plus 1 with its relay output exposed as `switch_0/output`
pub fn shelly_connector() -> ConnectorConfig {
    let mut output = PropertyConfig::new(id("output"), DataType::Bool);
    output.settable = true;

    let mut channel = ChannelConfig::new(id("switch_0"));
    channel.properties.push(output);

    let mut device = DeviceConfig::new(id(SHELLY_DEVICE));
    device.endpoint = Some("192.168.1.60".to_string());
    device.channels.push(channel);

    let mut config = ConnectorConfig::new(
        "shelly",
        ConnectorKind::Shelly,
        TransportConfig::WebSocket(WebSocketConfig::default()),
    );
    config.devices.push(device);
    config
}

pub struct Harness {
    pub orchestrator: ConnectorOrchestrator,
    pub factory: MockTransportFactory,
    pub store: Arc<MemoryStateStore>,
    pub documents: UnboundedReceiver<PublishedDocument>,
}

pub fn harness(config: ConnectorConfig) -> Harness {
    let (publisher, documents) = ChannelPublisher::new();
    let store = Arc::new(MemoryStateStore::new(Arc::new(publisher)));
    let factory = MockTransportFactory::new();
    let orchestrator = ConnectorOrchestrator::new(
        config,
        store.clone(),
        Arc::new(factory.clone()),
        EventLoop::try_current().unwrap(),
    );
    Harness {
        orchestrator,
        factory,
        store,
        documents,
    }
}

/// Let spawned clients run, then tick once
pub async fn settle(orchestrator: &mut ConnectorOrchestrator, millis: u64) -> usize {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    orchestrator.tick()
}

pub fn publish(topic: &str, payload: &str) -> WireFrame {
    WireFrame::Mqtt(MqttPublish::new(topic, payload.to_string(), QoS::AtLeastOnce, false))
}

/// Minimal Modbus TCP server: every coil reads as on, input register
/// `n` reads as `1000 + n`, writes are acknowledged
pub fn modbus_slave(frame: &WireFrame) -> Vec<WireFrame> {
    let WireFrame::Binary(request) = frame else {
        return Vec::new();
    };
    let (mbap, pdu) = request.split_at(7);
    let reply: Vec<u8> = match pdu[0] {
        0x01 | 0x02 => {
            let count = usize::from(u16::from_be_bytes([pdu[3], pdu[4]]));
            let bytes = count.div_ceil(8);
            let mut reply = vec![pdu[0], bytes as u8];
            reply.extend(std::iter::repeat(0xFF).take(bytes));
            reply
        },
        0x03 | 0x04 => {
            let start = u16::from_be_bytes([pdu[1], pdu[2]]);
            let count = u16::from_be_bytes([pdu[3], pdu[4]]);
            let mut reply = vec![pdu[0], (count * 2) as u8];
            for register in start..start + count {
                reply.extend_from_slice(&(1000 + register).to_be_bytes());
            }
            reply
        },
        0x05 | 0x06 | 0x0F | 0x10 => pdu[..5].to_vec(),
        _ => return Vec::new(),
    };

    let mut response = Vec::with_capacity(7 + reply.len());
    response.extend_from_slice(&mbap[..4]);
    response.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
    response.push(mbap[6]);
    response.extend_from_slice(&reply);
    vec![WireFrame::Binary(Bytes::from(response))]
}

/// Binary frames whose function code is `function`
pub fn modbus_requests(sent: &[WireFrame], function: u8) -> Vec<Bytes> {
    sent.iter()
        .filter_map(|frame| match frame {
            WireFrame::Binary(bytes) if bytes.len() > 7 && bytes[7] == function => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

/// MQTT publishes to `/set` topics
pub fn set_publishes(sent: &[WireFrame]) -> Vec<MqttPublish> {
    sent.iter()
        .filter_map(|frame| match frame {
            WireFrame::Mqtt(publish) if publish.topic.ends_with("/set") => Some(publish.clone()),
            _ => None,
        })
        .collect()
}

/// Minimal Shelly Gen2 device: the relay is off, every other call succeeds
pub fn shelly_device(frame: &WireFrame) -> Vec<WireFrame> {
    let WireFrame::Text(text) = frame else {
        return Vec::new();
    };
    let request: Value = serde_json::from_str(text).unwrap();
    let result = match request["method"].as_str() {
        Some("Shelly.GetStatus") => json!({"switch:0": {"id": 0, "output": false, "apower": 0.0}}),
        Some("Shelly.GetDeviceInfo") => json!({"id": SHELLY_DEVICE, "model": "SNSW-001X16EU", "ver": "1.0.8"}),
        _ => json!({"was_on": false}),
    };
    let response = json!({
        "id": request["id"],
        "src": SHELLY_DEVICE,
        "dst": request["src"],
        "result": result,
    });
    vec![WireFrame::Text(response.to_string())]
}

/// JSON-RPC calls of `method`
pub fn rpc_calls(sent: &[WireFrame], method: &str) -> Vec<Value> {
    sent.iter()
        .filter_map(|frame| match frame {
            WireFrame::Text(text) => serde_json::from_str::<Value>(text).ok(),
            _ => None,
        })
        .filter(|call| call["method"] == method)
        .collect()
}
