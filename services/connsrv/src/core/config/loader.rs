//! Figment-based configuration loader

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use tracing::{debug, info};

use super::types::AppConfig;
use crate::error::{ConnSrvError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONNSRV_";

/// Layers defaults, an optional configuration file and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    use_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            use_env: true,
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip `CONNSRV_*` overrides
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConnSrvError::config(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("yaml");
            figment = match extension {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                other => {
                    return Err(ConnSrvError::config(format!(
                        "unsupported configuration format: {other}"
                    )))
                },
            };
            debug!("Configuration file: {}", path.display());
        }

        if self.use_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment)
    }

    pub fn load(&self) -> Result<AppConfig> {
        let config: AppConfig = self.figment()?.extract()?;
        info!(
            "Loaded configuration: {} connector(s), {} enabled",
            config.connectors.len(),
            config.enabled_connectors().count()
        );
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = ConfigLoader::new().without_env().load().unwrap();
        assert_eq!(config.service.name, "connsrv");
        assert!(config.connectors.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/connsrv.yaml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConnSrvError::ConfigError(_)));
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "logging:\n  level: debug\nconnectors:\n  - name: shelly\n    kind: shelly\n    transport: {{ type: web_socket }}\n"
        )
        .unwrap();

        let config = ConfigLoader::new().without_env().with_file(file.path()).load().unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.connectors.len(), 1);
        config.validate().unwrap();
    }
}
