//! HTTP entry point: WebSocket upgrades on any path, plus the greeting page
//! and share link for plain requests.

use crate::config::ServerConfig;
use crate::share::{encoded_share_link, GREETING};
use crate::shutdown::TunnelTracker;
use crate::supervisor;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wsrelay_core::auth::ClientCredential;

/// Read-only state shared by every connection.
pub struct RelayState {
    /// Server configuration
    pub config: ServerConfig,
    /// Credential every handshake is checked against
    pub credential: ClientCredential,
    /// Active tunnel count and drain state
    pub tunnels: TunnelTracker,
}

impl RelayState {
    pub fn new(config: ServerConfig, credential: ClientCredential, tunnels: TunnelTracker) -> Self {
        Self {
            config,
            credential,
            tunnels,
        }
    }
}

/// Build the router. Every path is handled by the same entry point.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new().fallback(entry_handler).with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_relay_server<F>(
    listener: TcpListener,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

async fn entry_handler(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
    uri: Uri,
) -> Response {
    match ws {
        Some(ws) => {
            if state.tunnels.is_draining() {
                return text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Shutting down\n".to_string(),
                );
            }
            ws.on_failed_upgrade(move |e| warn!(%peer, "WebSocket upgrade failed: {}", e))
                .on_upgrade(move |socket| supervisor::handle_connection(socket, peer, state))
        }
        None => plain_response(&state.config, uri.path()),
    }
}

fn plain_response(config: &ServerConfig, path: &str) -> Response {
    if path == "/" {
        return text_response(StatusCode::OK, GREETING.to_string());
    }
    if path.strip_prefix('/') == Some(config.uuid.as_str()) {
        let link = encoded_share_link(&config.uuid, &config.domain, &config.name);
        return text_response(StatusCode::OK, link);
    }
    text_response(StatusCode::NOT_FOUND, "Not Found\n".to_string())
}

fn text_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}
