use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use gatehub_tunnel::{MemoryTunnelStorage, TunnelManager};

/// Tunnel control-plane service: loads durable tunnel state, starts every
/// active server and client, and tears them down on Ctrl-C.
#[tokio::main]
async fn main() -> Result<()> {
    gatehub_common::init_tracing();

    let config = gatehub_config::Config::load()?;
    info!(
        tenant = %config.tunnel.default_tenant,
        "starting tunnel control plane"
    );

    let storage = Arc::new(MemoryTunnelStorage::new());
    let manager = Arc::new(TunnelManager::new(config.tunnel.clone(), storage));

    manager.initialize().await?;
    manager.start_all().await;

    // Compatibility shim for call sites that have no handle wired through
    gatehub_tunnel::set_global(manager.clone());

    info!(
        servers = manager.loaded_server_count().await,
        clients = manager.loaded_client_count().await,
        "tunnel control plane running"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("received Ctrl-C, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    manager.shutdown().await;
    info!("tunnel control plane shutdown complete");
    Ok(())
}
