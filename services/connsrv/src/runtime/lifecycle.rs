//! Service lifecycle
//!
//! Runs one orchestrator per enabled connector on the caller's event loop
//! until shutdown. A connector that fails to start is logged and left
//! stopped; the others keep running.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use super::event_loop::EventLoop;
use super::orchestrator::ConnectorOrchestrator;
use crate::core::config::AppConfig;
use crate::error::Result;
use crate::storage::StateStore;
use crate::transport::TransportFactory;

/// All connectors of one service instance
pub struct ConnectorService {
    config: AppConfig,
    store: Arc<dyn StateStore>,
    transports: Arc<dyn TransportFactory>,
}

impl ConnectorService {
    pub fn new(config: AppConfig, store: Arc<dyn StateStore>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            store,
            transports,
        }
    }

    /// Orchestrators for the enabled connectors, not yet started
    pub fn orchestrators(&self, event_loop: &EventLoop) -> Vec<ConnectorOrchestrator> {
        self.config
            .enabled_connectors()
            .map(|connector| {
                ConnectorOrchestrator::new(
                    connector.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.transports),
                    event_loop.scoped(),
                )
            })
            .collect()
    }

    /// Run every connector until `event_loop` shuts down. Returns how many
    /// connectors ran to completion.
    pub async fn run(&self, event_loop: &EventLoop) -> Result<usize> {
        let orchestrators = self.orchestrators(event_loop);
        if orchestrators.is_empty() {
            warn!("No enabled connectors configured");
            return Ok(0);
        }
        info!("Starting {} connector(s)...", orchestrators.len());

        let shutdown = event_loop.shutdown_token().clone();
        let runs = orchestrators.into_iter().map(|mut orchestrator| {
            let shutdown = shutdown.clone();
            async move {
                let name = orchestrator.config().name.clone();
                match orchestrator.run(shutdown).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Connector {} failed: {}", name, e);
                        false
                    },
                }
            }
        });
        let completed = join_all(runs).await.into_iter().filter(|ok| *ok).count();
        info!("All connectors stopped");
        Ok(completed)
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}. Only Ctrl+C will stop the service", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    },
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::consumers::test_support;
    use crate::storage::{LogPublisher, MemoryStateStore};
    use crate::transport::MockTransportFactory;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_shutdown() {
        let mut disabled = test_support::connector();
        disabled.name = "disabled".to_string();
        disabled.enabled = false;
        let config = AppConfig {
            connectors: vec![test_support::connector(), disabled],
            ..AppConfig::default()
        };
        let factory = MockTransportFactory::new();
        let service = ConnectorService::new(
            config,
            Arc::new(MemoryStateStore::new(Arc::new(LogPublisher))),
            Arc::new(factory.clone()),
        );
        let event_loop = EventLoop::try_current().unwrap();
        assert_eq!(service.orchestrators(&event_loop).len(), 1);

        let token = event_loop.shutdown_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        assert_eq!(service.run(&event_loop).await.unwrap(), 1);
        assert!(factory.handle("meter").connect_attempts() >= 1);
        assert!(!factory.handle("meter").is_connected());
    }
}
