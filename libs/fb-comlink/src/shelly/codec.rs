//! Shelly Gen2 JSON-RPC codec

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::{trace, warn};
use uuid::Uuid;

use super::components::{channel_identifier, split_channel, split_component_key, ComponentTable};
use crate::codec::{Codec, WireFrame};
use crate::error::{ComlinkError, Result};
use crate::message::{
    DiscoveredChannel, DiscoveredDevice, Identifier, Message, PropertyAddress,
    PropertyStateMessage,
};
use crate::value::PropertyValue;

const GET_STATUS: &str = "Shelly.GetStatus";
const GET_DEVICE_INFO: &str = "Shelly.GetDeviceInfo";
const MAX_PENDING_CALLS: usize = 256;

#[derive(Debug, Clone)]
struct PendingCall {
    method: &'static str,
    device: Option<Identifier>,
}

pub struct ShellyCodec {
    connector: Uuid,
    table: ComponentTable,
    /// `src` of outgoing calls; devices address their replies to it
    source: String,
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl ShellyCodec {
    pub fn new(connector: Uuid, table: ComponentTable, source: impl Into<String>) -> Self {
        Self {
            connector,
            table,
            source: source.into(),
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    fn call(&mut self, device: Option<&Identifier>, method: &'static str, params: Option<Value>) -> WireFrame {
        let id = self.next_id;
        self.next_id += 1;

        if self.pending.len() >= MAX_PENDING_CALLS {
            if let Some(oldest) = self.pending.keys().min().copied() {
                self.pending.remove(&oldest);
            }
        }
        self.pending.insert(
            id,
            PendingCall {
                method,
                device: device.cloned(),
            },
        );

        let mut request = json!({
            "id": id,
            "src": self.source,
            "method": method,
        });
        if let (Some(params), Some(object)) = (params, request.as_object_mut()) {
            object.insert("params".to_string(), params);
        }
        WireFrame::Text(request.to_string())
    }

    fn device_of(origin: Option<&Identifier>, frame: &Map<String, Value>) -> Result<Identifier> {
        if let Some(device) = origin {
            return Ok(device.clone());
        }
        let src = frame
            .get("src")
            .and_then(Value::as_str)
            .ok_or_else(|| ComlinkError::malformed("frame has no 'src'"))?;
        Identifier::new(src.to_lowercase()).map_err(|e| ComlinkError::malformed(e.to_string()))
    }

    fn decode_text(&mut self, origin: Option<&Identifier>, text: &str) -> Result<Vec<Message>> {
        let frame: Value = serde_json::from_str(text)?;
        let Value::Object(frame) = frame else {
            return Err(ComlinkError::malformed("RPC frame is not a JSON object"));
        };

        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            let device = Self::device_of(origin, &frame)?;
            return match method {
                "NotifyStatus" | "NotifyFullStatus" => {
                    let params = frame
                        .get("params")
                        .ok_or_else(|| ComlinkError::malformed(format!("{method} without params")))?;
                    self.status_messages(&device, params)
                },
                "NotifyEvent" => {
                    trace!("Ignoring NotifyEvent from {}", device);
                    Ok(Vec::new())
                },
                other => Err(ComlinkError::unsupported(format!("notification '{other}'"))),
            };
        }

        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ComlinkError::malformed("frame is neither a notification nor a response"))?;
        let call = self
            .pending
            .remove(&id)
            .ok_or_else(|| ComlinkError::malformed(format!("response to unknown request id {id}")))?;
        let device = Self::device_of(call.device.as_ref().or(origin), &frame)?;

        if let Some(error) = frame.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
            warn!("{} rejected {}: code={} message={}", device, call.method, code, message);
            return Ok(Vec::new());
        }

        let result = frame
            .get("result")
            .ok_or_else(|| ComlinkError::malformed(format!("response {id} without result")))?;
        match call.method {
            GET_STATUS => {
                let mut messages = self.status_messages(&device, result)?;
                messages.push(Message::DeviceDiscovered(self.describe(&device, result)?));
                Ok(messages)
            },
            GET_DEVICE_INFO => Ok(vec![Message::DeviceDiscovered(self.device_info(&device, result))]),
            _ => {
                trace!("{} acknowledged {}", device, call.method);
                Ok(Vec::new())
            },
        }
    }

    fn status_messages(&self, device: &Identifier, status: &Value) -> Result<Vec<Message>> {
        let status = status
            .as_object()
            .ok_or_else(|| ComlinkError::malformed("status is not a JSON object"))?;

        let mut messages = Vec::new();
        let mut first_error = None;
        for (key, component_status) in status {
            let Some((component, index)) = split_component_key(key) else {
                continue;
            };
            let Some(spec) = self.table.component(component) else {
                if !self.table.is_ignored(component) {
                    first_error.get_or_insert(ComlinkError::unsupported(format!("component '{key}'")));
                }
                continue;
            };
            let channel = channel_identifier(component, index)?;

            for field in &spec.fields {
                let Some(raw) = field.lookup(component_status) else {
                    continue;
                };
                let Some(value) = json_value(raw) else {
                    continue;
                };
                let decoded = value
                    .coerce(field.data_type, &field.format())
                    .map_err(|e| ComlinkError::malformed(format!("{key}.{}: {e}", field.path)))
                    .and_then(|value| {
                        let address = PropertyAddress {
                            device: device.clone(),
                            channel: Some(channel.clone()),
                            property: Identifier::new(field.property)?,
                        };
                        PropertyStateMessage::new(self.connector, address, value)
                    });
                match decoded {
                    Ok(message) => messages.push(Message::PropertyState(message)),
                    Err(e) => {
                        warn!("Skipping {} {}: {}", device, key, e);
                        first_error.get_or_insert(e);
                    },
                }
            }
        }

        match first_error {
            Some(e) if messages.is_empty() => Err(e),
            _ => Ok(messages),
        }
    }

    fn describe(&self, device: &Identifier, status: &Value) -> Result<DiscoveredDevice> {
        let mut discovered = DiscoveredDevice::new(self.connector, device.clone());
        let Some(status) = status.as_object() else {
            return Ok(discovered);
        };
        for key in status.keys() {
            let Some((component, index)) = split_component_key(key) else {
                continue;
            };
            let Some(spec) = self.table.component(component) else {
                continue;
            };
            let properties = spec
                .fields
                .iter()
                .map(|field| field.describe())
                .collect::<Result<Vec<_>>>()?;
            discovered = discovered.with_channel(DiscoveredChannel {
                identifier: channel_identifier(component, index)?,
                properties,
            });
        }
        Ok(discovered)
    }

    fn device_info(&self, device: &Identifier, info: &Value) -> DiscoveredDevice {
        let text = |key: &str| info.get(key).and_then(Value::as_str).map(str::to_string);
        let mut discovered = DiscoveredDevice::new(self.connector, device.clone());
        if let Some(name) = text("name").or_else(|| text("app")) {
            discovered = discovered.with_name(name);
        }
        if let Some(model) = text("model") {
            discovered = discovered.with_model(model);
        }
        if let Some(firmware) = text("ver").or_else(|| text("fw_id")) {
            discovered = discovered.with_firmware(firmware);
        }
        discovered
    }
}

impl Codec for ShellyCodec {
    fn name(&self) -> &'static str {
        "shelly"
    }

    fn decode(&mut self, origin: Option<&Identifier>, frame: &WireFrame) -> Result<Vec<Message>> {
        match frame {
            WireFrame::Text(text) => self.decode_text(origin, text),
            WireFrame::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| ComlinkError::malformed(format!("RPC frame is not UTF-8: {e}")))?;
                self.decode_text(origin, text)
            },
            WireFrame::Mqtt(_) => Err(ComlinkError::malformed(
                "Shelly RPC codec expects WebSocket frames",
            )),
        }
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<WireFrame>> {
        let Message::PropertyWrite(write) = message else {
            return Err(ComlinkError::invalid_argument(format!(
                "Shelly cannot encode {} messages",
                message.kind()
            )));
        };
        let address = write.address();
        let (component, index) = address
            .channel
            .as_ref()
            .and_then(split_channel)
            .ok_or_else(|| {
                ComlinkError::invalid_argument(format!("{address} is not a component channel"))
            })?;
        let field = self
            .table
            .component(component)
            .and_then(|spec| spec.field(address.property.as_str()))
            .ok_or_else(|| ComlinkError::invalid_argument(format!("{address} is not a known field")))?;
        let write_spec = field
            .write
            .ok_or_else(|| ComlinkError::invalid_argument(format!("{address} is read-only")))?;
        let value = write.value().coerce(field.data_type, &field.format())?;

        let mut params = Map::new();
        params.insert("id".to_string(), json!(index));
        params.insert(write_spec.param.to_string(), to_json(&value));
        let device = address.device.clone();
        Ok(vec![self.call(Some(&device), write_spec.method, Some(Value::Object(params)))])
    }

    fn poll_frames(&mut self, device: &Identifier) -> Result<Vec<WireFrame>> {
        Ok(vec![self.call(Some(device), GET_STATUS, None)])
    }

    fn discovery_frames(&mut self, device: Option<&Identifier>) -> Vec<WireFrame> {
        match device {
            Some(device) => vec![self.call(Some(device), GET_DEVICE_INFO, None)],
            None => Vec::new(),
        }
    }

    fn connection_reset(&mut self, device: Option<&Identifier>) {
        self.pending.retain(|_, call| call.device.as_ref() != device);
    }
}

fn json_value(raw: &Value) -> Option<PropertyValue> {
    match raw {
        Value::Bool(v) => Some(PropertyValue::Bool(*v)),
        Value::Number(n) => n
            .as_i64()
            .map(PropertyValue::Int)
            .or_else(|| n.as_u64().map(PropertyValue::Uint))
            .or_else(|| n.as_f64().map(PropertyValue::Float)),
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        _ => None,
    }
}

fn to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Bool(v) => json!(v),
        PropertyValue::Int(v) => json!(v),
        PropertyValue::Uint(v) => json!(v),
        PropertyValue::Float(v) => json!(v),
        PropertyValue::String(v) | PropertyValue::Enum(v) => json!(v),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::message::PropertyWriteMessage;
    use tracing_test::traced_test;

    fn codec() -> ShellyCodec {
        ShellyCodec::new(Uuid::nil(), ComponentTable::gen2(), "connsrv")
    }

    fn device() -> Identifier {
        Identifier::new("shellyplus1-a8032ab12345").unwrap()
    }

    fn text(value: Value) -> WireFrame {
        WireFrame::Text(value.to_string())
    }

    fn property_states(messages: &[Message]) -> Vec<(String, PropertyValue)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::PropertyState(s) => Some((s.address().to_string(), s.value().clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_notify_status() {
        let mut codec = codec();
        let frame = text(json!({
            "src": "shellyplus1-a8032ab12345",
            "dst": "connsrv",
            "method": "NotifyStatus",
            "params": {
                "ts": 1_700_000_000.5,
                "switch:0": {"id": 0, "output": true, "apower": 12.5}
            }
        }));
        let messages = codec.decode(None, &frame).unwrap();
        let states = property_states(&messages);
        assert_eq!(
            states,
            vec![
                ("shellyplus1-a8032ab12345/switch_0/output".to_string(), PropertyValue::Bool(true)),
                ("shellyplus1-a8032ab12345/switch_0/power".to_string(), PropertyValue::Float(12.5)),
            ]
        );
    }

    #[test]
    fn test_get_status_response_and_discovery() {
        let mut codec = codec();
        let device = device();
        let WireFrame::Text(request) = &codec.poll_frames(&device).unwrap()[0] else {
            panic!("expected text frame");
        };
        let request: Value = serde_json::from_str(request).unwrap();
        assert_eq!(request["method"], "Shelly.GetStatus");
        let id = request["id"].as_u64().unwrap();

        let response = text(json!({
            "id": id,
            "src": "shellyplus1-a8032ab12345",
            "dst": "connsrv",
            "result": {
                "cover:0": {"id": 0, "state": "stopped", "current_pos": 40},
                "wifi": {"sta_ip": "192.168.1.20"},
                "sys": {"uptime": 10}
            }
        }));
        let messages = codec.decode(Some(&device), &response).unwrap();
        let states = property_states(&messages);
        assert!(states.contains(&(
            "shellyplus1-a8032ab12345/cover_0/state".to_string(),
            PropertyValue::Enum("stopped".into())
        )));
        assert!(states.contains(&(
            "shellyplus1-a8032ab12345/cover_0/position".to_string(),
            PropertyValue::Uint(40)
        )));
        let discovered = messages
            .iter()
            .find_map(|m| match m {
                Message::DeviceDiscovered(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(discovered.channels()[0].identifier.as_str(), "cover_0");
    }

    #[test]
    fn test_device_info() {
        let mut codec = codec();
        let device = device();
        let WireFrame::Text(request) = &codec.discovery_frames(Some(&device))[0] else {
            panic!("expected text frame");
        };
        let id = serde_json::from_str::<Value>(request).unwrap()["id"].as_u64().unwrap();
        let response = text(json!({
            "id": id,
            "src": "shellyplus1-a8032ab12345",
            "result": {"name": null, "id": "shellyplus1-a8032ab12345", "model": "SNSW-001X16EU", "gen": 2, "ver": "1.0.8", "app": "Plus1"}
        }));
        let messages = codec.decode(Some(&device), &response).unwrap();
        let Message::DeviceDiscovered(discovered) = &messages[0] else {
            panic!("expected discovery");
        };
        assert_eq!(discovered.name(), Some("Plus1"));
        assert_eq!(discovered.model(), Some("SNSW-001X16EU"));
        assert_eq!(discovered.firmware(), Some("1.0.8"));
    }

    #[test]
    fn test_encode_switch_set() {
        let mut codec = codec();
        let address =
            PropertyAddress::channel_property("shellyplus1-a8032ab12345", "switch_0", "output").unwrap();
        let write = Message::PropertyWrite(
            PropertyWriteMessage::new(Uuid::nil(), address, PropertyValue::Bool(true)).unwrap(),
        );
        let WireFrame::Text(request) = &codec.encode(&write).unwrap()[0] else {
            panic!("expected text frame");
        };
        let request: Value = serde_json::from_str(request).unwrap();
        assert_eq!(request["method"], "Switch.Set");
        assert_eq!(request["src"], "connsrv");
        assert_eq!(request["params"], json!({"id": 0, "on": true}));
    }

    #[test]
    fn test_encode_rejections() {
        let mut codec = codec();
        let read_only =
            PropertyAddress::channel_property("shellyplus1-a8032ab12345", "switch_0", "power").unwrap();
        let write = Message::PropertyWrite(
            PropertyWriteMessage::new(Uuid::nil(), read_only, PropertyValue::Float(1.0)).unwrap(),
        );
        assert!(matches!(
            codec.encode(&write),
            Err(ComlinkError::InvalidArgument(_))
        ));

        let brightness =
            PropertyAddress::channel_property("shellyplus1-a8032ab12345", "light_0", "brightness").unwrap();
        let write = Message::PropertyWrite(
            PropertyWriteMessage::new(Uuid::nil(), brightness, PropertyValue::Int(300)).unwrap(),
        );
        assert!(matches!(
            codec.encode(&write),
            Err(ComlinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        let mut codec = codec();
        assert!(matches!(
            codec.decode(None, &WireFrame::Text("{not json".into())),
            Err(ComlinkError::MalformedInput(_))
        ));
        assert!(matches!(
            codec.decode(None, &text(json!({"id": 99, "result": {}}))),
            Err(ComlinkError::MalformedInput(_))
        ));
        let unknown = text(json!({
            "src": "shellyplus1-a8032ab12345",
            "method": "NotifyStatus",
            "params": {"pm1:0": {"id": 0, "apower": 3.0}}
        }));
        assert!(matches!(
            codec.decode(None, &unknown),
            Err(ComlinkError::UnsupportedType(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_rpc_error_reply_is_dropped() {
        let mut codec = codec();
        let device = device();
        let WireFrame::Text(request) = &codec.poll_frames(&device).unwrap()[0] else {
            panic!("expected text frame");
        };
        let id = serde_json::from_str::<Value>(request).unwrap()["id"].as_u64().unwrap();
        let reply = text(json!({"id": id, "src": "x", "error": {"code": -103, "message": "Invalid argument"}}));
        assert!(codec.decode(Some(&device), &reply).unwrap().is_empty());
        assert!(logs_contain("code=-103 message=Invalid argument"));

        // The call is settled, a repeated reply has nothing to match
        assert!(matches!(
            codec.decode(Some(&device), &reply),
            Err(ComlinkError::MalformedInput(_))
        ));
    }
}
