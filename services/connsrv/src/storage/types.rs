//! State record types

use chrono::{DateTime, Utc};
use fb_comlink::{ConnectionState, PropertyValue};
use serde::Serialize;

/// Connection state of a connector or device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Property state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyRecord {
    /// Last value reported by the device
    pub actual: Option<PropertyValue>,
    /// Value requested by a write, until the device confirms it
    pub expected: Option<PropertyValue>,
    /// A write is outstanding
    pub pending: bool,
    pub updated_at: DateTime<Utc>,
}

impl PropertyRecord {
    pub fn new() -> Self {
        Self {
            actual: None,
            expected: None,
            pending: false,
            updated_at: Utc::now(),
        }
    }
}

impl Default for PropertyRecord {
    fn default() -> Self {
        Self::new()
    }
}
