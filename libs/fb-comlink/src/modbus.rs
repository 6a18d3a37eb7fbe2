//! Modbus RTU/TCP codec
//!
//! - [`pdu`]: fixed-size PDU buffer and builder
//! - [`request`]: typed requests/responses for the supported function codes
//! - [`frame`]: RTU (CRC-16) and TCP (MBAP) framing
//! - [`register_map`]: property ↔ register grammar table
//! - [`codec`]: [`ModbusCodec`], correlating responses with the reads it issued

pub mod codec;
pub mod constants;
pub mod frame;
pub mod pdu;
pub mod register_map;
pub mod request;

pub use codec::ModbusCodec;
pub use frame::{Adu, ModbusFraming};
pub use pdu::{ModbusPdu, PduBuilder};
pub use register_map::{ReadBlock, RegisterEntry, RegisterKind, RegisterMap, RegisterSpec, WriteFunction};
pub use request::{FunctionCode, ModbusRequest, ModbusResponse};
