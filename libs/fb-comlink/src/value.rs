//! Property data types and values
//!
//! Every property carries a [`DataType`] tag. Values decoded from the wire are
//! converted into that type with [`PropertyValue::coerce`], which rejects values
//! that do not fit the declared width instead of truncating them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ComlinkError, Result};

pub const PAYLOAD_BOOL_TRUE_VALUE: &str = "true";
pub const PAYLOAD_BOOL_FALSE_VALUE: &str = "false";

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "char")]
    Int8,
    #[serde(alias = "short")]
    Int16,
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "uchar")]
    Uint8,
    #[serde(alias = "ushort")]
    Uint16,
    #[serde(alias = "uint")]
    Uint32,
    #[serde(alias = "float")]
    Float32,
    String,
    Enum,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::String => "string",
            Self::Enum => "enum",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::String | Self::Enum)
    }
}

impl FromStr for DataType {
    type Err = ComlinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bool" | "boolean" => Ok(Self::Bool),
            "int8" | "char" => Ok(Self::Int8),
            "int16" | "short" => Ok(Self::Int16),
            "int32" | "int" => Ok(Self::Int32),
            "uint8" | "uchar" => Ok(Self::Uint8),
            "uint16" | "ushort" => Ok(Self::Uint16),
            "uint32" | "uint" => Ok(Self::Uint32),
            "float32" | "float" => Ok(Self::Float32),
            "string" => Ok(Self::String),
            "enum" => Ok(Self::Enum),
            other => Err(ComlinkError::unsupported(format!("data type '{other}'"))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a property as carried by messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Enum(String),
}

impl PropertyValue {
    /// Infer a value from a textual payload: booleans, integers, floats, then text.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == PAYLOAD_BOOL_TRUE_VALUE {
            return Self::Bool(true);
        }
        if trimmed == PAYLOAD_BOOL_FALSE_VALUE {
            return Self::Bool(false);
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = trimmed.parse::<u64>() {
            return Self::Uint(v);
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Float(v),
            _ => Self::String(raw.to_string()),
        }
    }

    /// Parse a textual payload directly into the declared type
    pub fn parse_as(raw: &str, data_type: DataType, format: &[String]) -> Result<Self> {
        Self::infer(raw).coerce(data_type, format)
    }

    /// Convert into `data_type`. `format` lists the allowed values of enums.
    pub fn coerce(&self, data_type: DataType, format: &[String]) -> Result<Self> {
        match data_type {
            DataType::Bool => self.to_bool().map(Self::Bool),
            DataType::Int8 => self
                .to_signed(i8::MIN.into(), i8::MAX.into(), data_type)
                .map(Self::Int),
            DataType::Int16 => self
                .to_signed(i16::MIN.into(), i16::MAX.into(), data_type)
                .map(Self::Int),
            DataType::Int32 => self
                .to_signed(i32::MIN.into(), i32::MAX.into(), data_type)
                .map(Self::Int),
            DataType::Uint8 => self.to_unsigned(u8::MAX.into(), data_type).map(Self::Uint),
            DataType::Uint16 => self.to_unsigned(u16::MAX.into(), data_type).map(Self::Uint),
            DataType::Uint32 => self.to_unsigned(u32::MAX.into(), data_type).map(Self::Uint),
            DataType::Float32 => self.to_float32().map(Self::Float),
            DataType::String => Ok(Self::String(self.to_payload())),
            DataType::Enum => self.to_enum(format).map(Self::Enum),
        }
    }

    /// Textual payload form (MQTT payloads, documents)
    pub fn to_payload(&self) -> String {
        match self {
            Self::Bool(true) => PAYLOAD_BOOL_TRUE_VALUE.to_string(),
            Self::Bool(false) => PAYLOAD_BOOL_FALSE_VALUE.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(v) | Self::Enum(v) => v.clone(),
        }
    }

    /// Rejects non-finite floats, which no wire format can carry
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Float(v) if !v.is_finite() => Err(ComlinkError::validation(format!(
                "property value {v} is not a finite number"
            ))),
            _ => Ok(()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.to_bool().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Uint(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn to_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::Int(0) | Self::Uint(0) => Ok(false),
            Self::Int(1) | Self::Uint(1) => Ok(true),
            Self::String(s) | Self::Enum(s) => match s.trim().to_lowercase().as_str() {
                "true" | "on" | "1" => Ok(true),
                "false" | "off" | "0" => Ok(false),
                _ => Err(ComlinkError::invalid_argument(format!(
                    "'{s}' is not a boolean"
                ))),
            },
            other => Err(ComlinkError::invalid_argument(format!(
                "{other} is not a boolean"
            ))),
        }
    }

    fn to_signed(&self, min: i64, max: i64, data_type: DataType) -> Result<i64> {
        let value = match self {
            Self::Bool(v) => i64::from(*v),
            Self::Int(v) => *v,
            Self::Uint(v) => i64::try_from(*v).map_err(|_| overflow(self, data_type))?,
            Self::Float(v) => whole_number(*v, data_type)?,
            Self::String(s) | Self::Enum(s) => s.trim().parse::<i64>().map_err(|_| {
                ComlinkError::invalid_argument(format!("'{s}' is not a {data_type} value"))
            })?,
        };
        if value < min || value > max {
            return Err(overflow(self, data_type));
        }
        Ok(value)
    }

    fn to_unsigned(&self, max: u64, data_type: DataType) -> Result<u64> {
        let value = match self {
            Self::Bool(v) => u64::from(*v),
            Self::Int(v) => u64::try_from(*v).map_err(|_| overflow(self, data_type))?,
            Self::Uint(v) => *v,
            Self::Float(v) => {
                u64::try_from(whole_number(*v, data_type)?).map_err(|_| overflow(self, data_type))?
            },
            Self::String(s) | Self::Enum(s) => s.trim().parse::<u64>().map_err(|_| {
                ComlinkError::invalid_argument(format!("'{s}' is not a {data_type} value"))
            })?,
        };
        if value > max {
            return Err(overflow(self, data_type));
        }
        Ok(value)
    }

    fn to_float32(&self) -> Result<f64> {
        let value = match self {
            Self::Bool(v) => f64::from(u8::from(*v)),
            Self::Int(v) => *v as f64,
            Self::Uint(v) => *v as f64,
            Self::Float(v) => *v,
            Self::String(s) | Self::Enum(s) => s.trim().parse::<f64>().map_err(|_| {
                ComlinkError::invalid_argument(format!("'{s}' is not a float32 value"))
            })?,
        };
        if !value.is_finite() || value.abs() > f64::from(f32::MAX) {
            return Err(overflow(self, DataType::Float32));
        }
        Ok(value)
    }

    fn to_enum(&self, format: &[String]) -> Result<String> {
        let value = self.to_payload();
        if !format.is_empty() && !format.iter().any(|allowed| allowed == &value) {
            return Err(ComlinkError::invalid_argument(format!(
                "'{value}' is not one of [{}]",
                format.join(", ")
            )));
        }
        Ok(value)
    }
}

fn whole_number(value: f64, data_type: DataType) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ComlinkError::invalid_argument(format!(
            "{value} is not a whole {data_type} value"
        )));
    }
    if value < i64::MIN as f64 || value > i64::MAX as f64 {
        return Err(ComlinkError::invalid_argument(format!(
            "{value} overflows {data_type}"
        )));
    }
    Ok(value as i64)
}

fn overflow(value: &PropertyValue, data_type: DataType) -> ComlinkError {
    ComlinkError::invalid_argument(format!("{value} overflows {data_type}"))
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_payload())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_infer_payloads() {
        assert_eq!(PropertyValue::infer("true"), PropertyValue::Bool(true));
        assert_eq!(PropertyValue::infer("false"), PropertyValue::Bool(false));
        assert_eq!(PropertyValue::infer("-12"), PropertyValue::Int(-12));
        assert_eq!(
            PropertyValue::infer("18446744073709551615"),
            PropertyValue::Uint(u64::MAX)
        );
        assert_eq!(PropertyValue::infer("21.5"), PropertyValue::Float(21.5));
        assert_eq!(
            PropertyValue::infer("open"),
            PropertyValue::String("open".into())
        );
        assert_eq!(PropertyValue::infer("NaN"), PropertyValue::String("NaN".into()));
    }

    #[test]
    fn test_coerce_rejects_overflow() {
        let err = PropertyValue::Int(128)
            .coerce(DataType::Int8, &[])
            .unwrap_err();
        assert!(matches!(err, ComlinkError::InvalidArgument(_)));
        assert!(PropertyValue::Int(-1).coerce(DataType::Uint16, &[]).is_err());
        assert!(PropertyValue::Uint(70_000).coerce(DataType::Uint16, &[]).is_err());
        assert!(PropertyValue::Float(1.5).coerce(DataType::Int32, &[]).is_err());
        assert!(PropertyValue::Float(1e40).coerce(DataType::Float32, &[]).is_err());
    }

    #[test]
    fn test_coerce_within_range() {
        assert_eq!(
            PropertyValue::Int(-128).coerce(DataType::Int8, &[]).unwrap(),
            PropertyValue::Int(-128)
        );
        assert_eq!(
            PropertyValue::Float(300.0).coerce(DataType::Uint16, &[]).unwrap(),
            PropertyValue::Uint(300)
        );
        assert_eq!(
            PropertyValue::String("on".into())
                .coerce(DataType::Bool, &[])
                .unwrap(),
            PropertyValue::Bool(true)
        );
        assert_eq!(
            PropertyValue::Int(7).coerce(DataType::String, &[]).unwrap(),
            PropertyValue::String("7".into())
        );
    }

    #[test]
    fn test_coerce_enum_checks_format() {
        let format = vec!["open".to_string(), "closed".to_string()];
        assert_eq!(
            PropertyValue::String("open".into())
                .coerce(DataType::Enum, &format)
                .unwrap(),
            PropertyValue::Enum("open".into())
        );
        assert!(PropertyValue::String("ajar".into())
            .coerce(DataType::Enum, &format)
            .is_err());
    }

    #[test]
    fn test_parse_as_and_payload() {
        let value = PropertyValue::parse_as("false", DataType::Bool, &[]).unwrap();
        assert_eq!(value.to_payload(), PAYLOAD_BOOL_FALSE_VALUE);
        let value = PropertyValue::parse_as("23.25", DataType::Float32, &[]).unwrap();
        assert_eq!(value.to_payload(), "23.25");
    }

    #[test]
    fn test_data_type_aliases() {
        assert_eq!("ushort".parse::<DataType>().unwrap(), DataType::Uint16);
        assert_eq!("float".parse::<DataType>().unwrap(), DataType::Float32);
        let dt: DataType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(dt, DataType::Int32);
        assert!(matches!(
            "date".parse::<DataType>(),
            Err(ComlinkError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_validate_rejects_nan() {
        assert!(PropertyValue::Float(f64::NAN).validate().is_err());
        assert!(PropertyValue::Float(1.0).validate().is_ok());
    }
}
