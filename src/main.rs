//! Offline relay server
//!
//! Loads configuration, runs the install and activate steps, then serves the
//! forward proxy (and optionally the metrics endpoint).

use anyhow::Context;
use offline_relay::{MetricsEndpoint, OfflineRelay, RelayConfig, RelayServer};
use std::env;
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// # Usage
/// ```bash
/// offline-relay                     # reads offline_relay.yaml
/// offline-relay /etc/relay.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting offline relay");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "offline_relay.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = RelayConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!("Configuration loaded successfully");
    info!("  - Namespace prefix: {}", config.namespace_prefix);
    info!("  - Generation: {} (pinned: {})", config.generation, config.pinned_generation);
    info!("  - Limits: media={}, image={}", config.media_limit, config.image_limit);
    info!("  - Store backend: {}", config.store.backend);
    info!(
        "  - Retry: {} attempts, {:?} backoff from {} ms",
        config.retry.max_attempts, config.retry.backoff, config.retry.backoff_base_ms
    );

    let listen: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen_address '{}'", config.listen_address))?;
    let metrics_addr = match &config.metrics_endpoint {
        Some(endpoint) if endpoint.enabled => Some(
            endpoint
                .address
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid metrics address '{}'", endpoint.address))?,
        ),
        _ => None,
    };

    let relay = OfflineRelay::from_config(config).await?;

    let install = relay.install().await;
    if !install.failed.is_empty() {
        info!("Precache incomplete: {:?}", install.failed);
    }
    match relay.activate().await {
        Ok(activation) => info!("Removed stale namespaces: {:?}", activation.deleted),
        Err(e) => warn!("Activation skipped, stale namespaces kept: {}", e),
    }

    if let Some(addr) = metrics_addr {
        let endpoint = MetricsEndpoint::new(relay.metrics_arc(), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    RelayServer::new(relay, listen)
        .serve()
        .await
        .context("relay server stopped")?;
    Ok(())
}
