//! Register map: the grammar table binding properties to Modbus registers

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::constants::{MODBUS_MAX_READ_COILS, MODBUS_MAX_READ_REGISTERS};
use super::request::ModbusRequest;
use crate::bytes::{
    f32_to_regs, i32_to_regs, reg_to_u16, regs_to_f32, regs_to_i32, regs_to_u32, u16_to_reg,
    u32_to_regs, ByteOrder,
};
use crate::error::{ComlinkError, Result};
use crate::message::{Identifier, PropertyAddress};
use crate::value::{DataType, PropertyValue};

/// Modbus data table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    Holding,
    Input,
}

impl RegisterKind {
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::Holding)
    }

    fn max_read(&self) -> u16 {
        if self.is_bit() {
            MODBUS_MAX_READ_COILS as u16
        } else {
            MODBUS_MAX_READ_REGISTERS as u16
        }
    }

    fn read_request(&self, station: u8, address: u16, count: u16) -> ModbusRequest {
        match self {
            Self::Coil => ModbusRequest::ReadCoils {
                station,
                address,
                count,
            },
            Self::DiscreteInput => ModbusRequest::ReadDiscreteInputs {
                station,
                address,
                count,
            },
            Self::Holding => ModbusRequest::ReadHoldingRegisters {
                station,
                address,
                count,
            },
            Self::Input => ModbusRequest::ReadInputRegisters {
                station,
                address,
                count,
            },
        }
    }
}

/// Function family used for writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFunction {
    /// FC05/FC06
    Single,
    /// FC15/FC16
    #[default]
    Multiple,
}

/// Register binding as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Overrides the device station
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<u8>,
    pub kind: RegisterKind,
    pub address: u16,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub write: WriteFunction,
}

impl RegisterSpec {
    pub fn new(kind: RegisterKind, address: u16) -> Self {
        Self {
            station: None,
            kind,
            address,
            byte_order: ByteOrder::default(),
            write: WriteFunction::default(),
        }
    }
}

/// Resolved register binding of one property
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEntry {
    pub property: PropertyAddress,
    pub station: u8,
    pub kind: RegisterKind,
    pub register: u16,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub write: WriteFunction,
}

impl RegisterEntry {
    pub fn new(
        property: PropertyAddress,
        station: u8,
        spec: &RegisterSpec,
        data_type: DataType,
    ) -> Result<Self> {
        if spec.kind.is_bit() && data_type != DataType::Bool {
            return Err(ComlinkError::unsupported(format!(
                "{property}: {:?} registers only carry bool values, not {data_type}",
                spec.kind
            )));
        }
        if matches!(data_type, DataType::String | DataType::Enum) {
            return Err(ComlinkError::unsupported(format!(
                "{property}: {data_type} values cannot be mapped to registers"
            )));
        }
        let entry = Self {
            property,
            station: spec.station.unwrap_or(station),
            kind: spec.kind,
            register: spec.address,
            data_type,
            byte_order: spec.byte_order,
            write: spec.write,
        };
        if entry.register.checked_add(entry.width() - 1).is_none() {
            return Err(ComlinkError::validation(format!(
                "{}: register {} overflows the address space",
                entry.property, entry.register
            )));
        }
        Ok(entry)
    }

    /// Registers (or coils) occupied
    pub fn width(&self) -> u16 {
        match self.data_type {
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 2,
            _ => 1,
        }
    }

    /// Decode the value from its registers, rejecting values wider than the declared type
    pub fn decode_registers(&self, regs: &[u16]) -> Result<PropertyValue> {
        let order = self.byte_order;
        let value = match (self.data_type, regs) {
            (DataType::Int32 | DataType::Uint32 | DataType::Float32, &[r0, r1]) => {
                let pair = [r0, r1];
                match self.data_type {
                    DataType::Int32 => PropertyValue::Int(regs_to_i32(&pair, order).into()),
                    DataType::Uint32 => PropertyValue::Uint(regs_to_u32(&pair, order).into()),
                    _ => {
                        let value = regs_to_f32(&pair, order);
                        if !value.is_finite() {
                            return Err(ComlinkError::malformed(format!(
                                "{}: register value {value} is not a finite float32",
                                self.property
                            )));
                        }
                        PropertyValue::Float(value.into())
                    },
                }
            },
            (_, &[reg]) if self.width() == 1 => {
                let raw = reg_to_u16(reg, order);
                match self.data_type {
                    DataType::Int8 | DataType::Int16 => PropertyValue::Int((raw as i16).into()),
                    _ => PropertyValue::Uint(raw.into()),
                }
            },
            _ => {
                return Err(ComlinkError::malformed(format!(
                    "{}: expected {} registers, got {}",
                    self.property,
                    self.width(),
                    regs.len()
                )))
            },
        };
        value.coerce(self.data_type, &[]).map_err(|_| {
            ComlinkError::malformed(format!(
                "{}: register value {value} overflows {}",
                self.property, self.data_type
            ))
        })
    }

    /// Encode a value into registers, `InvalidArgument` when it does not fit
    pub fn encode_registers(&self, value: &PropertyValue) -> Result<Vec<u16>> {
        let order = self.byte_order;
        let value = value.coerce(self.data_type, &[])?;
        let regs = match (self.data_type, &value) {
            (DataType::Bool, PropertyValue::Bool(v)) => vec![u16_to_reg(u16::from(*v), order)],
            (DataType::Int8 | DataType::Int16, PropertyValue::Int(v)) => {
                vec![u16_to_reg(*v as i16 as u16, order)]
            },
            (DataType::Uint8 | DataType::Uint16, PropertyValue::Uint(v)) => {
                vec![u16_to_reg(*v as u16, order)]
            },
            (DataType::Int32, PropertyValue::Int(v)) => i32_to_regs(*v as i32, order).to_vec(),
            (DataType::Uint32, PropertyValue::Uint(v)) => u32_to_regs(*v as u32, order).to_vec(),
            (DataType::Float32, PropertyValue::Float(v)) => {
                f32_to_regs(*v as f32, order).to_vec()
            },
            (data_type, value) => {
                return Err(ComlinkError::invalid_argument(format!(
                    "{}: cannot encode {value} as {data_type}",
                    self.property
                )))
            },
        };
        Ok(regs)
    }

    /// Request writing `value` to this entry
    pub fn write_request(&self, value: &PropertyValue) -> Result<ModbusRequest> {
        if !self.kind.is_writable() {
            return Err(ComlinkError::invalid_argument(format!(
                "{}: {:?} registers are read-only",
                self.property, self.kind
            )));
        }
        let station = self.station;
        let address = self.register;
        if self.kind.is_bit() {
            let PropertyValue::Bool(on) = value.coerce(DataType::Bool, &[])? else {
                return Err(ComlinkError::invalid_argument("coil value must be boolean"));
            };
            return Ok(match self.write {
                WriteFunction::Single => ModbusRequest::WriteSingleCoil {
                    station,
                    address,
                    value: on,
                },
                WriteFunction::Multiple => ModbusRequest::WriteMultipleCoils {
                    station,
                    address,
                    values: vec![on],
                },
            });
        }

        let values = self.encode_registers(value)?;
        match (self.write, values.as_slice()) {
            (WriteFunction::Single, &[single]) => Ok(ModbusRequest::WriteSingleRegister {
                station,
                address,
                value: single,
            }),
            _ => Ok(ModbusRequest::WriteMultipleRegisters {
                station,
                address,
                values,
            }),
        }
    }
}

/// Contiguous read covering several entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlock {
    pub station: u8,
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
    /// Indexes into the register map
    pub entries: Vec<usize>,
}

impl ReadBlock {
    pub fn request(&self) -> ModbusRequest {
        self.kind.read_request(self.station, self.start, self.count)
    }
}

/// All register bindings of a connector
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    entries: Vec<RegisterEntry>,
    by_property: HashMap<PropertyAddress, usize>,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RegisterEntry) -> Result<()> {
        if self.by_property.contains_key(&entry.property) {
            return Err(ComlinkError::validation(format!(
                "{} is mapped twice",
                entry.property
            )));
        }
        self.by_property
            .insert(entry.property.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, property: &PropertyAddress) -> Option<&RegisterEntry> {
        self.by_property
            .get(property)
            .and_then(|idx| self.entries.get(*idx))
    }

    pub fn entry(&self, idx: usize) -> Option<&RegisterEntry> {
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group the device's entries into as few reads as the protocol limits allow.
    /// Only adjacent or overlapping registers are merged.
    pub fn read_plan(&self, device: &Identifier) -> Vec<ReadBlock> {
        let mut indexes: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| &entry.property.device == device)
            .map(|(idx, _)| idx)
            .collect();
        indexes.sort_by_key(|idx| {
            let entry = &self.entries[*idx];
            (entry.station, entry.kind, entry.register)
        });

        let mut blocks: Vec<ReadBlock> = Vec::new();
        for idx in indexes {
            let entry = &self.entries[idx];
            let end = u32::from(entry.register) + u32::from(entry.width());
            if let Some(block) = blocks.last_mut() {
                let block_end = u32::from(block.start) + u32::from(block.count);
                let merged_end = block_end.max(end);
                if block.station == entry.station
                    && block.kind == entry.kind
                    && u32::from(entry.register) <= block_end
                    && merged_end - u32::from(block.start) <= u32::from(entry.kind.max_read())
                {
                    block.count = (merged_end - u32::from(block.start)) as u16;
                    block.entries.push(idx);
                    continue;
                }
            }
            blocks.push(ReadBlock {
                station: entry.station,
                kind: entry.kind,
                start: entry.register,
                count: entry.width(),
                entries: vec![idx],
            });
        }
        blocks
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn spec(kind: RegisterKind, address: u16) -> RegisterSpec {
        RegisterSpec {
            station: None,
            kind,
            address,
            byte_order: ByteOrder::BigEndian,
            write: WriteFunction::Multiple,
        }
    }

    fn entry(property: &str, kind: RegisterKind, address: u16, data_type: DataType) -> RegisterEntry {
        let property = PropertyAddress::device_property("meter", property).unwrap();
        RegisterEntry::new(property, 1, &spec(kind, address), data_type).unwrap()
    }

    #[test]
    fn test_int8_overflow_rejected_on_decode() {
        let entry = entry("level", RegisterKind::Holding, 0, DataType::Int8);
        assert_eq!(
            entry.decode_registers(&[0x007F]).unwrap(),
            PropertyValue::Int(127)
        );
        assert_eq!(
            entry.decode_registers(&[0xFF80]).unwrap(),
            PropertyValue::Int(-128)
        );
        assert!(matches!(
            entry.decode_registers(&[0x0080]),
            Err(ComlinkError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_float32_word_order() {
        let mut e = entry("power", RegisterKind::Input, 10, DataType::Float32);
        e.byte_order = ByteOrder::BigEndianSwap;
        assert_eq!(
            e.decode_registers(&[0x0000, 0x41C8]).unwrap(),
            PropertyValue::Float(25.0)
        );
        assert!(e.decode_registers(&[0x41C8]).is_err());
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let e = entry("setpoint", RegisterKind::Holding, 0, DataType::Uint16);
        assert_eq!(
            e.encode_registers(&PropertyValue::Int(500)).unwrap(),
            vec![500]
        );
        assert!(matches!(
            e.encode_registers(&PropertyValue::Int(70_000)),
            Err(ComlinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_request_function_family() {
        let coil = entry("relay", RegisterKind::Coil, 3, DataType::Bool);
        assert_eq!(
            coil.write_request(&PropertyValue::Bool(true)).unwrap(),
            ModbusRequest::WriteMultipleCoils {
                station: 1,
                address: 3,
                values: vec![true]
            }
        );

        let mut single = entry("mode", RegisterKind::Holding, 7, DataType::Int16);
        single.write = WriteFunction::Single;
        assert_eq!(
            single.write_request(&PropertyValue::Int(-2)).unwrap(),
            ModbusRequest::WriteSingleRegister {
                station: 1,
                address: 7,
                value: 0xFFFE
            }
        );

        let input = entry("temp", RegisterKind::Input, 0, DataType::Int16);
        assert!(matches!(
            input.write_request(&PropertyValue::Int(1)),
            Err(ComlinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_bit_tables_require_bool() {
        let property = PropertyAddress::device_property("meter", "relay").unwrap();
        let result = RegisterEntry::new(property, 1, &spec(RegisterKind::Coil, 0), DataType::Uint16);
        assert!(matches!(result, Err(ComlinkError::UnsupportedType(_))));
    }

    #[test]
    fn test_read_plan_merges_adjacent() {
        let mut map = RegisterMap::new();
        map.insert(entry("voltage", RegisterKind::Input, 0, DataType::Float32))
            .unwrap();
        map.insert(entry("current", RegisterKind::Input, 2, DataType::Float32))
            .unwrap();
        map.insert(entry("frequency", RegisterKind::Input, 10, DataType::Uint16))
            .unwrap();
        map.insert(entry("relay", RegisterKind::Coil, 0, DataType::Bool))
            .unwrap();

        let device = Identifier::new("meter").unwrap();
        let plan = map.read_plan(&device);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].kind, RegisterKind::Coil);
        assert_eq!((plan[1].start, plan[1].count), (0, 4));
        assert_eq!(plan[1].entries.len(), 2);
        assert_eq!((plan[2].start, plan[2].count), (10, 1));

        let other = Identifier::new("other").unwrap();
        assert!(map.read_plan(&other).is_empty());
    }

    #[test]
    fn test_duplicate_mapping_rejected() {
        let mut map = RegisterMap::new();
        map.insert(entry("relay", RegisterKind::Coil, 0, DataType::Bool))
            .unwrap();
        assert!(map
            .insert(entry("relay", RegisterKind::Coil, 1, DataType::Bool))
            .is_err());
    }
}
