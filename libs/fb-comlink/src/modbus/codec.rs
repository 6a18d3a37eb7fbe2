//! Modbus codec
//!
//! Builds read requests from the register map, correlates responses with the
//! reads it issued (TCP: transaction id, RTU: oldest in-flight read of the
//! station and function) and turns register contents into property state
//! messages. Reads left unanswered past the response timeout are dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use super::frame::{Adu, ModbusFraming};
use super::register_map::{ReadBlock, RegisterMap};
use super::request::{FunctionCode, ModbusRequest, ModbusResponse};
use crate::codec::{Codec, WireFrame};
use crate::error::{ComlinkError, Result};
use crate::message::{Identifier, Message, PropertyStateMessage};
use crate::value::PropertyValue;

/// Reads awaiting a response, oldest first
const MAX_PENDING_READS: usize = 256;

#[derive(Debug, Clone)]
struct PendingRead {
    origin: Option<Identifier>,
    transaction: u16,
    request: ModbusRequest,
    block: Option<ReadBlock>,
    deadline: Instant,
}

/// Stateful Modbus codec for one connector
pub struct ModbusCodec {
    connector: Uuid,
    framing: ModbusFraming,
    map: RegisterMap,
    next_transaction: u16,
    pending: VecDeque<PendingRead>,
    response_timeout: Duration,
}

impl ModbusCodec {
    pub fn new(connector: Uuid, framing: ModbusFraming, map: RegisterMap) -> Self {
        Self {
            connector,
            framing,
            map,
            next_transaction: 1,
            pending: VecDeque::new(),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn framing(&self) -> ModbusFraming {
        self.framing
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn pending_reads(&self) -> usize {
        self.pending.len()
    }

    /// Drop reads whose response did not arrive by `now`. Returns how many timed out.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| {
            let alive = p.deadline > now;
            if !alive {
                warn!(
                    "Modbus response timeout: station={} function={} transaction={}",
                    p.request.station(),
                    p.request.function_code(),
                    p.transaction
                );
            }
            alive
        });
        before - self.pending.len()
    }

    /// Frame a raw request. Reads are remembered for response correlation.
    pub fn encode_request(
        &mut self,
        origin: Option<&Identifier>,
        request: &ModbusRequest,
    ) -> Result<WireFrame> {
        self.frame_request(origin, request, None)
    }

    /// Decode a response frame into the typed response and the resulting messages
    pub fn decode_response(
        &mut self,
        origin: Option<&Identifier>,
        bytes: &[u8],
    ) -> Result<(ModbusResponse, Vec<Message>)> {
        let adu = self.framing.decode(bytes)?;
        let raw_fc = adu
            .pdu
            .function_code()
            .ok_or_else(|| ComlinkError::malformed("empty response PDU"))?;
        let function = FunctionCode::from_u8(raw_fc & 0x7F)?;
        trace!(
            "Modbus response: station={} function={} transaction={:?}",
            adu.station,
            function,
            adu.transaction
        );

        self.expire_pending(Instant::now());

        // The read is answered even when the answer is an exception
        let pending = if function.is_read() {
            Some(self.take_pending(origin, &adu, function)?)
        } else {
            None
        };
        let response = ModbusResponse::from_pdu(adu.station, &adu.pdu)?;

        let Some(pending) = pending else {
            // Write acknowledgements carry no state
            return Ok((response, Vec::new()));
        };
        if pending.request.function_code() != response.function() {
            return Err(ComlinkError::malformed(format!(
                "response function {} does not match request {}",
                response.function(),
                pending.request.function_code()
            )));
        }

        let messages = match pending.block {
            Some(block) => self.block_messages(&block, &response)?,
            None => Vec::new(),
        };
        Ok((response, messages))
    }

    fn frame_request(
        &mut self,
        origin: Option<&Identifier>,
        request: &ModbusRequest,
        block: Option<ReadBlock>,
    ) -> Result<WireFrame> {
        let pdu = request.to_pdu()?;
        let transaction = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        if request.function_code().is_read() {
            if self.pending.len() >= MAX_PENDING_READS {
                if let Some(stale) = self.pending.pop_front() {
                    debug!(
                        "Dropping unanswered Modbus read: station={} function={}",
                        stale.request.station(),
                        stale.request.function_code()
                    );
                }
            }
            self.pending.push_back(PendingRead {
                origin: origin.cloned(),
                transaction,
                request: request.clone(),
                block,
                deadline: Instant::now() + self.response_timeout,
            });
        }

        let bytes = self.framing.encode(transaction, request.station(), &pdu);
        trace!("Modbus request: {}", WireFrame::Binary(bytes.clone()));
        Ok(WireFrame::Binary(bytes))
    }

    fn take_pending(
        &mut self,
        origin: Option<&Identifier>,
        adu: &Adu,
        function: FunctionCode,
    ) -> Result<PendingRead> {
        let position = match adu.transaction {
            Some(transaction) => self
                .pending
                .iter()
                .position(|p| p.transaction == transaction && p.origin.as_ref() == origin),
            None => self.pending.iter().position(|p| {
                p.request.station() == adu.station
                    && p.request.function_code() == function
                    && p.origin.as_ref() == origin
            }),
        };
        position
            .and_then(|idx| self.pending.remove(idx))
            .ok_or_else(|| {
                ComlinkError::malformed(format!(
                    "response from station {} matches no pending request (transaction {:?})",
                    adu.station, adu.transaction
                ))
            })
    }

    fn block_messages(&self, block: &ReadBlock, response: &ModbusResponse) -> Result<Vec<Message>> {
        let count = usize::from(block.count);
        let mut messages = Vec::with_capacity(block.entries.len());
        let mut first_error = None;

        for idx in &block.entries {
            let Some(entry) = self.map.entry(*idx) else {
                continue;
            };
            let offset = usize::from(entry.register - block.start);
            let decoded = match response {
                ModbusResponse::Bits { values, .. } => {
                    if values.len() < count {
                        return Err(ComlinkError::malformed(format!(
                            "expected {count} bits, got {}",
                            values.len()
                        )));
                    }
                    Ok(PropertyValue::Bool(values[offset]))
                },
                ModbusResponse::Registers { values, .. } => {
                    if values.len() != count {
                        return Err(ComlinkError::malformed(format!(
                            "expected {count} registers, got {}",
                            values.len()
                        )));
                    }
                    let width = usize::from(entry.width());
                    entry.decode_registers(&values[offset..offset + width])
                },
                ModbusResponse::WriteAck { .. } => continue,
            };

            match decoded.and_then(|value| {
                PropertyStateMessage::new(self.connector, entry.property.clone(), value)
            }) {
                Ok(message) => messages.push(Message::PropertyState(message)),
                Err(e) => {
                    warn!("Skipping {}: {}", entry.property, e);
                    first_error.get_or_insert(e);
                },
            }
        }

        match first_error {
            Some(e) if messages.is_empty() => Err(e),
            _ => Ok(messages),
        }
    }
}

impl Codec for ModbusCodec {
    fn name(&self) -> &'static str {
        "modbus"
    }

    fn decode(&mut self, origin: Option<&Identifier>, frame: &WireFrame) -> Result<Vec<Message>> {
        match frame {
            WireFrame::Binary(bytes) => self.decode_response(origin, bytes).map(|(_, m)| m),
            other => Err(ComlinkError::malformed(format!(
                "Modbus expects binary frames, got {other:?}"
            ))),
        }
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<WireFrame>> {
        let Message::PropertyWrite(write) = message else {
            return Err(ComlinkError::invalid_argument(format!(
                "Modbus cannot encode {} messages",
                message.kind()
            )));
        };
        let entry = self.map.get(write.address()).ok_or_else(|| {
            ComlinkError::invalid_argument(format!("{} has no register mapping", write.address()))
        })?;
        let request = entry.write_request(write.value())?;
        let origin = write.address().device.clone();
        Ok(vec![self.frame_request(Some(&origin), &request, None)?])
    }

    fn poll_frames(&mut self, device: &Identifier) -> Result<Vec<WireFrame>> {
        self.expire_pending(Instant::now());
        let plan = self.map.read_plan(device);
        let mut frames = Vec::with_capacity(plan.len());
        for block in plan {
            let request = block.request();
            frames.push(self.frame_request(Some(device), &request, Some(block))?);
        }
        Ok(frames)
    }

    fn connection_reset(&mut self, device: Option<&Identifier>) {
        let before = self.pending.len();
        self.pending.retain(|p| p.origin.as_ref() != device);
        if before != self.pending.len() {
            debug!(
                "Discarded {} pending Modbus reads after reconnect",
                before - self.pending.len()
            );
        }
    }
}
