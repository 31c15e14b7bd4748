use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arena_siege_server::config::ServerConfig;
use arena_siege_server::metrics::Metrics;
use arena_siege_server::net::transport::{self, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Arena Siege Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    info!(
        bind = %config.bind_address,
        port = config.port,
        max_rooms = config.max_rooms,
        max_players = config.max_players_per_room,
        "Configuration loaded"
    );

    let address = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    let metrics = Arc::new(Metrics::new());
    let state = Arc::new(AppState::new(config, metrics));

    transport::serve(listener, state, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}
