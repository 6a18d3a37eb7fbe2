//! Typed Modbus requests and responses

use std::fmt;

use super::constants::{
    COIL_OFF, COIL_ON, MODBUS_MAX_READ_COILS, MODBUS_MAX_READ_REGISTERS, MODBUS_MAX_WRITE_COILS,
    MODBUS_MAX_WRITE_REGISTERS,
};
use super::pdu::{ModbusPdu, PduBuilder};
use crate::error::{ComlinkError, Result};

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            other => Err(ComlinkError::unsupported(format!(
                "Modbus function code 0x{other:02X}"
            ))),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    pub fn is_bit_access(&self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::WriteSingleCoil
                | Self::WriteMultipleCoils
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02X} ({})",
            self.as_u8(),
            ModbusPdu::function_code_description(self.as_u8())
        )
    }
}

/// Modbus request addressed to one station
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    ReadCoils { station: u8, address: u16, count: u16 },
    ReadDiscreteInputs { station: u8, address: u16, count: u16 },
    ReadHoldingRegisters { station: u8, address: u16, count: u16 },
    ReadInputRegisters { station: u8, address: u16, count: u16 },
    WriteSingleCoil { station: u8, address: u16, value: bool },
    WriteSingleRegister { station: u8, address: u16, value: u16 },
    WriteMultipleCoils { station: u8, address: u16, values: Vec<bool> },
    WriteMultipleRegisters { station: u8, address: u16, values: Vec<u16> },
}

impl ModbusRequest {
    pub fn station(&self) -> u8 {
        match self {
            Self::ReadCoils { station, .. }
            | Self::ReadDiscreteInputs { station, .. }
            | Self::ReadHoldingRegisters { station, .. }
            | Self::ReadInputRegisters { station, .. }
            | Self::WriteSingleCoil { station, .. }
            | Self::WriteSingleRegister { station, .. }
            | Self::WriteMultipleCoils { station, .. }
            | Self::WriteMultipleRegisters { station, .. } => *station,
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            Self::ReadCoils { address, .. }
            | Self::ReadDiscreteInputs { address, .. }
            | Self::ReadHoldingRegisters { address, .. }
            | Self::ReadInputRegisters { address, .. }
            | Self::WriteSingleCoil { address, .. }
            | Self::WriteSingleRegister { address, .. }
            | Self::WriteMultipleCoils { address, .. }
            | Self::WriteMultipleRegisters { address, .. } => *address,
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Number of coils/registers a read request asks for
    pub fn read_count(&self) -> Option<u16> {
        match self {
            Self::ReadCoils { count, .. }
            | Self::ReadDiscreteInputs { count, .. }
            | Self::ReadHoldingRegisters { count, .. }
            | Self::ReadInputRegisters { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn to_pdu(&self) -> Result<ModbusPdu> {
        let fc = self.function_code().as_u8();
        match self {
            Self::ReadCoils { address, count, .. } | Self::ReadDiscreteInputs { address, count, .. } => {
                check_quantity(*count as usize, MODBUS_MAX_READ_COILS, self.function_code())?;
                Ok(PduBuilder::new()
                    .function_code(fc)?
                    .address(*address)?
                    .quantity(*count)?
                    .build())
            },
            Self::ReadHoldingRegisters { address, count, .. }
            | Self::ReadInputRegisters { address, count, .. } => {
                check_quantity(*count as usize, MODBUS_MAX_READ_REGISTERS, self.function_code())?;
                Ok(PduBuilder::new()
                    .function_code(fc)?
                    .address(*address)?
                    .quantity(*count)?
                    .build())
            },
            Self::WriteSingleCoil { address, value, .. } => Ok(PduBuilder::new()
                .function_code(fc)?
                .address(*address)?
                .quantity(if *value { COIL_ON } else { COIL_OFF })?
                .build()),
            Self::WriteSingleRegister { address, value, .. } => Ok(PduBuilder::new()
                .function_code(fc)?
                .address(*address)?
                .quantity(*value)?
                .build()),
            Self::WriteMultipleCoils {
                address, values, ..
            } => {
                check_quantity(values.len(), MODBUS_MAX_WRITE_COILS, self.function_code())?;
                let packed = pack_bits(values);
                Ok(PduBuilder::new()
                    .function_code(fc)?
                    .address(*address)?
                    .quantity(values.len() as u16)?
                    .byte(packed.len() as u8)?
                    .data(&packed)?
                    .build())
            },
            Self::WriteMultipleRegisters {
                address, values, ..
            } => {
                check_quantity(values.len(), MODBUS_MAX_WRITE_REGISTERS, self.function_code())?;
                let mut builder = PduBuilder::new()
                    .function_code(fc)?
                    .address(*address)?
                    .quantity(values.len() as u16)?
                    .byte((values.len() * 2) as u8)?;
                for value in values {
                    builder = builder.quantity(*value)?;
                }
                Ok(builder.build())
            },
        }
    }

    /// Parse a request PDU (device simulators, request echo checks)
    pub fn from_pdu(station: u8, pdu: &ModbusPdu) -> Result<Self> {
        let fc = FunctionCode::from_u8(pdu.u8_at(0)?)?;
        let address = pdu.u16_at(1)?;
        let request = match fc {
            FunctionCode::ReadCoils => Self::ReadCoils {
                station,
                address,
                count: pdu.u16_at(3)?,
            },
            FunctionCode::ReadDiscreteInputs => Self::ReadDiscreteInputs {
                station,
                address,
                count: pdu.u16_at(3)?,
            },
            FunctionCode::ReadHoldingRegisters => Self::ReadHoldingRegisters {
                station,
                address,
                count: pdu.u16_at(3)?,
            },
            FunctionCode::ReadInputRegisters => Self::ReadInputRegisters {
                station,
                address,
                count: pdu.u16_at(3)?,
            },
            FunctionCode::WriteSingleCoil => {
                let value = match pdu.u16_at(3)? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    other => {
                        return Err(ComlinkError::malformed(format!(
                            "FC05 value 0x{other:04X} is neither ON nor OFF"
                        )))
                    },
                };
                Self::WriteSingleCoil {
                    station,
                    address,
                    value,
                }
            },
            FunctionCode::WriteSingleRegister => Self::WriteSingleRegister {
                station,
                address,
                value: pdu.u16_at(3)?,
            },
            FunctionCode::WriteMultipleCoils => {
                let count = pdu.u16_at(3)? as usize;
                let data = payload(pdu, 5)?;
                if data.len() * 8 < count {
                    return Err(ComlinkError::malformed("FC15 byte count too small for quantity"));
                }
                let mut values = unpack_bits(data);
                values.truncate(count);
                Self::WriteMultipleCoils {
                    station,
                    address,
                    values,
                }
            },
            FunctionCode::WriteMultipleRegisters => {
                let count = pdu.u16_at(3)? as usize;
                let data = payload(pdu, 5)?;
                if data.len() != count * 2 {
                    return Err(ComlinkError::malformed("FC16 byte count does not match quantity"));
                }
                Self::WriteMultipleRegisters {
                    station,
                    address,
                    values: registers(data),
                }
            },
        };
        Ok(request)
    }
}

/// Modbus response from one station
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// FC01/FC02, every bit of the returned bytes (LSB first)
    Bits {
        station: u8,
        function: FunctionCode,
        values: Vec<bool>,
    },
    /// FC03/FC04
    Registers {
        station: u8,
        function: FunctionCode,
        values: Vec<u16>,
    },
    /// FC05/FC06 echo value, FC15/FC16 written quantity
    WriteAck {
        station: u8,
        function: FunctionCode,
        address: u16,
        value: u16,
    },
}

impl ModbusResponse {
    pub fn station(&self) -> u8 {
        match self {
            Self::Bits { station, .. }
            | Self::Registers { station, .. }
            | Self::WriteAck { station, .. } => *station,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::Bits { function, .. }
            | Self::Registers { function, .. }
            | Self::WriteAck { function, .. } => *function,
        }
    }

    /// Parse a response PDU. Exception responses are malformed input carrying the code.
    pub fn from_pdu(station: u8, pdu: &ModbusPdu) -> Result<Self> {
        let raw_fc = pdu.u8_at(0)?;
        if pdu.is_exception() {
            let code = pdu.u8_at(1)?;
            return Err(ComlinkError::malformed(format!(
                "station {station} exception 0x{code:02X} ({}) for function 0x{:02X}",
                exception_description(code),
                raw_fc & 0x7F
            )));
        }

        let function = FunctionCode::from_u8(raw_fc)?;
        let response = match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => Self::Bits {
                station,
                function,
                values: unpack_bits(payload(pdu, 1)?),
            },
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let data = payload(pdu, 1)?;
                if data.len() % 2 != 0 {
                    return Err(ComlinkError::malformed("odd register byte count"));
                }
                Self::Registers {
                    station,
                    function,
                    values: registers(data),
                }
            },
            _ => Self::WriteAck {
                station,
                function,
                address: pdu.u16_at(1)?,
                value: pdu.u16_at(3)?,
            },
        };
        Ok(response)
    }

    /// Build the response PDU a device would send
    pub fn to_pdu(&self) -> Result<ModbusPdu> {
        match self {
            Self::Bits {
                function, values, ..
            } => {
                let packed = pack_bits(values);
                Ok(PduBuilder::new()
                    .function_code(function.as_u8())?
                    .byte(packed.len() as u8)?
                    .data(&packed)?
                    .build())
            },
            Self::Registers {
                function, values, ..
            } => {
                let mut builder = PduBuilder::new()
                    .function_code(function.as_u8())?
                    .byte((values.len() * 2) as u8)?;
                for value in values {
                    builder = builder.quantity(*value)?;
                }
                Ok(builder.build())
            },
            Self::WriteAck {
                function,
                address,
                value,
                ..
            } => Ok(PduBuilder::new()
                .function_code(function.as_u8())?
                .address(*address)?
                .quantity(*value)?
                .build()),
        }
    }
}

fn check_quantity(count: usize, max: usize, fc: FunctionCode) -> Result<()> {
    if count == 0 || count > max {
        return Err(ComlinkError::invalid_argument(format!(
            "quantity {count} out of range 1..={max} for {fc}"
        )));
    }
    Ok(())
}

/// Byte-count prefixed data starting at `offset`
fn payload(pdu: &ModbusPdu, offset: usize) -> Result<&[u8]> {
    let byte_count = pdu.u8_at(offset)? as usize;
    pdu.as_slice()
        .get(offset + 1..offset + 1 + byte_count)
        .ok_or_else(|| {
            ComlinkError::malformed(format!(
                "PDU truncated: byte count {byte_count}, have {} bytes",
                pdu.len().saturating_sub(offset + 1)
            ))
        })
}

fn registers(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Pack bits LSB first
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (i, value) in values.iter().enumerate() {
        if *value {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

pub fn unpack_bits(data: &[u8]) -> Vec<bool> {
    data.iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}

fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Server Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Server Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Failed To Respond",
        _ => "Unknown Exception",
    }
}
