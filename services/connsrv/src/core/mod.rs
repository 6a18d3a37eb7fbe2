//! Service core: command line bootstrap and configuration

pub mod bootstrap;
pub mod config;
