//! FastyBird device connector service

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use connsrv::core::bootstrap::Args;
use connsrv::runtime::{wait_for_shutdown, ConnectorService, EventLoop};
use connsrv::storage::{LogPublisher, MemoryStateStore};
use connsrv::{ConfigLoader, DefaultTransportFactory};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // one cooperative loop drives every connector
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ConfigLoader::new()
        .with_file(&args.config)
        .load()
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if args.no_color {
        config.logging.ansi = false;
    }
    let _log_guard = connsrv::logging::init_logging(&config.logging)?;

    info!("Starting {} v{}", config.service.name, env!("CARGO_PKG_VERSION"));
    if args.is_development() {
        info!("Development mode, configuration from {}", args.config.display());
    }

    if args.validate {
        config.validate()?;
        info!("Validation completed successfully");
        return Ok(());
    }
    if let Err(e) = config.validate() {
        // invalid devices are skipped at start, so keep going
        error!("Configuration problems: {}", e);
    }

    let event_loop = EventLoop::try_current()?;
    let store = Arc::new(MemoryStateStore::new(Arc::new(LogPublisher)));
    let service = ConnectorService::new(config, store, Arc::new(DefaultTransportFactory));

    let shutdown = event_loop.shutdown_token().clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let completed = service.run(&event_loop).await?;
    info!("Service stopped, {} connector(s) shut down cleanly", completed);
    Ok(())
}
