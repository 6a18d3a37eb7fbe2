//! Connection and device state enums

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ComlinkError;

/// Connection state of a connector or one of its devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Lost,
    #[default]
    Unknown,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Lost => "lost",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by a device itself (FastyBird `$state` attribute)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Init,
    Ready,
    Connected,
    Disconnected,
    Sleeping,
    Alert,
    Lost,
    Unknown,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Sleeping => "sleeping",
            Self::Alert => "alert",
            Self::Lost => "lost",
            Self::Unknown => "unknown",
        }
    }

    pub fn to_connection_state(self) -> ConnectionState {
        match self {
            Self::Ready | Self::Connected | Self::Alert => ConnectionState::Connected,
            Self::Disconnected | Self::Sleeping => ConnectionState::Disconnected,
            Self::Lost => ConnectionState::Lost,
            Self::Init | Self::Unknown => ConnectionState::Unknown,
        }
    }
}

impl FromStr for DeviceState {
    type Err = ComlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "sleeping" => Ok(Self::Sleeping),
            "alert" => Ok(Self::Alert),
            "lost" => Ok(Self::Lost),
            "unknown" => Ok(Self::Unknown),
            other => Err(ComlinkError::unsupported(format!("device state '{other}'"))),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
