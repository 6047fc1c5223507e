//! wsrelay server - WebSocket tunnel endpoint.
//!
//! Accepts WebSocket upgrades on any path, authenticates the handshake and
//! relays bytes to the requested TCP destination.

mod bridge;
mod config;
mod metrics;
mod share;
mod shutdown;
mod supervisor;
mod tunnel;

use anyhow::{Context, Result};
use clap::Parser;
use config::ServerConfig;
use shutdown::TunnelTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let mut config = ServerConfig::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting wsrelay-server v{}", env!("CARGO_PKG_VERSION"));

    let credential = config
        .credential()
        .context("UUID must be 32 hex digits, optionally separated by dashes")?;
    if config.uses_default_uuid() {
        warn!("Using the built-in default UUID; set UUID to choose your own");
    }

    let port = config.resolve_port();
    info!("Port: {}", port);
    if !config.domain.is_empty() {
        info!("Domain: {}", config.domain);
    }

    if let Some(addr) = config.metrics_addr() {
        metrics::install_exporter(addr)?;
    }

    let tunnels = TunnelTracker::new(Duration::from_secs(config.shutdown_timeout));
    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;

    let state = Arc::new(tunnel::RelayState::new(config, credential, tunnels.clone()));

    let draining = tunnels.clone();
    tunnel::run_relay_server(listener, state, async move {
        shutdown::signal_received().await;
        draining.start_draining();
    })
    .await?;

    // Upgraded tunnels outlive the HTTP server; give them time to finish.
    tunnels.drain().await;
    info!("Shutdown complete");

    Ok(())
}
