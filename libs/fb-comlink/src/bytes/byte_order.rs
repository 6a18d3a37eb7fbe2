//! Byte/word order of values spread over Modbus registers
//!
//! Uses ABCD notation where A is the most significant byte. For the 32-bit value
//! `0x12345678`:
//! - `BigEndian (ABCD)`: [0x12, 0x34, 0x56, 0x78]
//! - `LittleEndian (DCBA)`: [0x78, 0x56, 0x34, 0x12]
//! - `BigEndianSwap (CDAB)`: [0x56, 0x78, 0x12, 0x34]
//! - `LittleEndianSwap (BADC)`: [0x34, 0x12, 0x78, 0x56]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ComlinkError;

/// Byte/word order used when a register map entry spans one or two registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// ABCD, network order
    #[default]
    #[serde(rename = "ABCD", alias = "abcd", alias = "big_endian")]
    BigEndian,

    /// DCBA
    #[serde(rename = "DCBA", alias = "dcba", alias = "little_endian")]
    LittleEndian,

    /// CDAB, big-endian words in swapped order (common on PLCs)
    #[serde(rename = "CDAB", alias = "cdab", alias = "big_endian_swap")]
    BigEndianSwap,

    /// BADC
    #[serde(rename = "BADC", alias = "badc", alias = "little_endian_swap")]
    LittleEndianSwap,

    /// AB, single register values only
    #[serde(rename = "AB", alias = "ab")]
    BigEndian16,

    /// BA, single register values only
    #[serde(rename = "BA", alias = "ba")]
    LittleEndian16,
}

impl ByteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "ABCD",
            Self::LittleEndian => "DCBA",
            Self::BigEndianSwap => "CDAB",
            Self::LittleEndianSwap => "BADC",
            Self::BigEndian16 => "AB",
            Self::LittleEndian16 => "BA",
        }
    }

    /// Whether bytes inside each 16-bit register are swapped
    pub fn swaps_register_bytes(&self) -> bool {
        matches!(
            self,
            Self::LittleEndian | Self::LittleEndianSwap | Self::LittleEndian16
        )
    }

    /// Whether the low word is transmitted first for 32-bit values
    pub fn low_word_first(&self) -> bool {
        matches!(self, Self::LittleEndian | Self::BigEndianSwap)
    }
}

impl FromStr for ByteOrder {
    type Err = ComlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_uppercase().replace('-', "");
        match normalized.as_str() {
            "ABCD" | "BE" | "BIG_ENDIAN" | "BIGENDIAN" => Ok(Self::BigEndian),
            "DCBA" | "LE" | "LITTLE_ENDIAN" | "LITTLEENDIAN" => Ok(Self::LittleEndian),
            "CDAB" | "BIG_ENDIAN_SWAP" => Ok(Self::BigEndianSwap),
            "BADC" | "LITTLE_ENDIAN_SWAP" => Ok(Self::LittleEndianSwap),
            "AB" => Ok(Self::BigEndian16),
            "BA" => Ok(Self::LittleEndian16),
            _ => Err(ComlinkError::validation(format!("unknown byte order '{s}'"))),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_from_str_valid() {
        assert_eq!("ABCD".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndian);
        assert_eq!("AB-CD".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndian);
        assert_eq!("le".parse::<ByteOrder>().unwrap(), ByteOrder::LittleEndian);
        assert_eq!("CDAB".parse::<ByteOrder>().unwrap(), ByteOrder::BigEndianSwap);
        assert_eq!("badc".parse::<ByteOrder>().unwrap(), ByteOrder::LittleEndianSwap);
        assert_eq!("BA".parse::<ByteOrder>().unwrap(), ByteOrder::LittleEndian16);
    }

    #[test]
    fn test_from_str_invalid() {
        assert!(matches!(
            "ACBD".parse::<ByteOrder>(),
            Err(ComlinkError::Validation(_))
        ));
        assert!("".parse::<ByteOrder>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let order: ByteOrder = serde_json::from_str("\"CDAB\"").unwrap();
        assert_eq!(order, ByteOrder::BigEndianSwap);
        let order: ByteOrder = serde_json::from_str("\"little_endian\"").unwrap();
        assert_eq!(order, ByteOrder::LittleEndian);
        assert_eq!(serde_json::to_string(&ByteOrder::BigEndian).unwrap(), "\"ABCD\"");
    }
}
