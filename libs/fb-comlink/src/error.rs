//! Communication Link Error Types
//!
//! Errors raised while building messages or translating them to and from the wire.

use thiserror::Error;

/// Result type for fb-comlink operations
pub type Result<T> = std::result::Result<T, ComlinkError>;

/// Communication link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComlinkError {
    /// Payload does not match the wire grammar (bad CRC, unparsable JSON, unknown topic...)
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Field or capability recognised syntactically but not supported
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Message lacks what the requested operation needs
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Message construction rejected a field
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ComlinkError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedType(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Errors caused by what arrived on the wire; the connection stays usable.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::MalformedInput(_) | Self::UnsupportedType(_))
    }
}

impl From<serde_json::Error> for ComlinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedInput(format!("JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_classification() {
        assert!(ComlinkError::malformed("crc").is_input_error());
        assert!(ComlinkError::unsupported("fc 0x2b").is_input_error());
        assert!(!ComlinkError::invalid_argument("no register").is_input_error());
        assert!(!ComlinkError::validation("identifier").is_input_error());
    }

    #[test]
    fn test_display() {
        let err = ComlinkError::malformed("CRC mismatch");
        assert_eq!(err.to_string(), "Malformed input: CRC mismatch");
    }
}
