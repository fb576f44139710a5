use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use thingsbridge::Bridge;
use thingsbridge::Config;
use thingsbridge::MemoryHub;
use thingsbridge::smartthings::RestClient;
use tracing_subscriber::filter::LevelFilter;

/// Expose SmartThings devices to a local home-automation hub
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "thingsbridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("thingsbridge starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let api = Arc::new(RestClient::new(
        &config.smartthings.base_url,
        &config.smartthings.access_token,
    )?);
    let hub = Arc::new(MemoryHub::new());
    let bridge = Arc::new(Bridge::new(api, hub.clone(), &config.smartthings));

    if config.smartthings.webhook_token.is_some() {
        tracing::info!("Webhook token configured, polling disabled");
    }

    let count = bridge.discover().await?;
    tracing::info!("Exposing {} accessories", count);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(thingsbridge::api::serve(
        config.api.listen.clone(),
        config.api.port,
        bridge.clone(),
        hub,
        shutdown_rx,
    ));

    tracing::info!("Press Ctrl+C to exit");

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    shutdown_tx.send(()).ok();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("HTTP API server failed: {}", e),
        Err(e) => tracing::error!("HTTP API server task panicked: {}", e),
    }

    tracing::info!("thingsbridge shutdown complete");

    Ok(())
}
