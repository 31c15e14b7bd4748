//! HTTP/WebSocket server wiring
//!
//! Player sessions, the agent entry points and the admin routes share one
//! axum router and one listener.

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::lobby::manager::RoomRegistry;
use crate::metrics::Metrics;
use crate::net::admin;
use crate::net::dos_protection::{ConnectionLimiter, DoSConfig, SourceRateLimiter};
use crate::net::protocol::ErrorCode;
use crate::net::session;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shared state behind every route
pub struct AppState {
    pub config: ServerConfig,
    pub dos: DoSConfig,
    pub registry: Arc<RoomRegistry>,
    pub metrics: Arc<Metrics>,
    /// Per-source throughput for the agent HTTP entry point
    pub agent_limiter: SourceRateLimiter,
    pub connections: ConnectionLimiter,
}

impl AppState {
    pub fn new(config: ServerConfig, metrics: Arc<Metrics>) -> Self {
        let dos = config.dos_config();
        let registry = Arc::new(RoomRegistry::new(config.registry_settings(), metrics.clone()));
        Self {
            agent_limiter: SourceRateLimiter::new(dos.agent_http_max_per_window, dos.agent_http_window),
            connections: ConnectionLimiter::new(&dos),
            config,
            dos,
            registry,
            metrics,
        }
    }
}

/// JSON body for transport-level failures
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(error: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            error,
            detail: detail.into(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(session::ws_handler))
        .route("/healthz", get(admin::healthz))
        .route("/readyz", get(admin::readyz))
        .route("/metrics", get(admin::metrics_text))
        .route("/metrics/json", get(admin::metrics_json))
        .route("/rooms", get(admin::list_rooms))
        .route("/rooms/{id}", get(admin::room_summary))
        .route("/rooms/{id}/agent", post(admin::agent_command))
        .route("/rooms/{id}/agent/ws", get(admin::agent_ws))
        .with_state(state)
}

/// Periodic reconnect-grace and limiter cleanup
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let now = Instant::now();
            let rooms = state.registry.sweep(now).await;
            let sources = state.agent_limiter.sweep(now);
            if rooms > 0 || sources > 0 {
                debug!(rooms, sources, "sweep");
            }
        }
    })
}

/// Serve until `shutdown` resolves, then tear down every room
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let address = listener.local_addr()?;
    let sweeper = spawn_sweeper(state.clone());
    let app = router(state.clone());

    info!(%address, "listening");
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    sweeper.abort();
    state.registry.shutdown_all().await;
    result.map_err(Into::into)
}
