//! Connector configuration
//!
//! Loaded with figment: built-in defaults, then the configuration file, then
//! `CONNSRV_` environment variables (`__` separates nested keys).

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;
