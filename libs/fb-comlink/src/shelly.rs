//! Shelly Gen2 JSON-RPC
//!
//! Devices push `NotifyStatus`/`NotifyFullStatus` notifications over the
//! WebSocket RPC channel and answer `Shelly.GetStatus`/`Shelly.GetDeviceInfo`
//! calls. Component instances (`switch:0`) become channels (`switch_0`).

pub mod codec;
pub mod components;

pub use codec::ShellyCodec;
pub use components::{ComponentSpec, ComponentTable, FieldSpec, WriteSpec};
