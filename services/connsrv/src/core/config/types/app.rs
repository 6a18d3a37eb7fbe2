//! Application configuration types

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{ConnectorConfig, LoggingConfig};
use crate::error::{ConnSrvError, Result};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_service_name() -> String {
    "connsrv".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            description: None,
        }
    }
}

impl AppConfig {
    /// Check every connector and device, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut ids = HashSet::new();
        for connector in &self.connectors {
            if !ids.insert(connector.id) {
                problems.push(format!("duplicate connector id {}", connector.id));
            }
            if let Err(e) = connector.validate() {
                problems.push(e.to_string());
                continue;
            }
            for device in &connector.devices {
                if let Err(e) = device.validate(connector.kind, &connector.transport) {
                    problems.push(format!("connector {}: {e}", connector.name));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConnSrvError::config(problems.join("; ")))
        }
    }

    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connectors.iter().filter(|c| c.enabled)
    }
}
