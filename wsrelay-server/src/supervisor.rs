//! Per-connection lifecycle.
//!
//! Each upgraded WebSocket is driven through
//! `Accepted → HeaderParsed → CredentialOk → Resolving → Connecting →
//! Relaying → Closed`. Any failure moves straight to `Failed`, is logged once
//! and drops both ends. Nothing is sent back to the peer on failure.

use crate::bridge::{self, RelayStats};
use crate::tunnel::RelayState;
use axum::extract::ws::{Message, WebSocket};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use wsrelay_core::protocol::HandshakePrefix;
use wsrelay_core::{ErrorCategory, RelayError, RelayResult};

/// Identifier used to correlate log lines of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell connections apart in logs.
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    HeaderParsed,
    CredentialOk,
    Resolving,
    Connecting,
    Relaying,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::HeaderParsed => "header_parsed",
            ConnectionState::CredentialOk => "credential_ok",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one connection.
#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: ConnectionState::Accepted,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(!self.state.is_terminal(), "transition out of {}", self.state);
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }
}

/// Entry point for an upgraded WebSocket.
pub async fn handle_connection(socket: WebSocket, peer: SocketAddr, state: Arc<RelayState>) {
    let id = ConnectionId::new();
    let span = info_span!("conn", %id, %peer);
    supervise(socket, state).instrument(span).await
}

async fn supervise(socket: WebSocket, state: Arc<RelayState>) {
    let _guard = state.tunnels.track();
    crate::metrics::record_connection_accepted();

    let mut lifecycle = Lifecycle::new();
    debug!("WebSocket connection established");

    match drive(&mut lifecycle, socket, &state).await {
        Ok(stats) => {
            lifecycle.advance(ConnectionState::Closed);
            crate::metrics::record_relayed(stats.uplink, stats.downlink);
            info!(uplink = stats.uplink, downlink = stats.downlink, "Tunnel closed");
        }
        Err(e) => {
            let failed_in = lifecycle.state;
            lifecycle.advance(ConnectionState::Failed);
            crate::metrics::record_failure(&e);
            match e.category() {
                // Peers dropping an established tunnel is routine.
                ErrorCategory::Relay => info!(state = %failed_in, "Tunnel ended: {}", e),
                category => warn!(state = %failed_in, %category, "Connection failed: {}", e),
            }
        }
    }
}

async fn drive(
    lifecycle: &mut Lifecycle,
    mut socket: WebSocket,
    state: &RelayState,
) -> RelayResult<RelayStats> {
    let message = timeout(state.config.handshake_timeout(), first_message(&mut socket))
        .await
        .map_err(|_| RelayError::Timeout("handshake"))??;

    let prefix = HandshakePrefix::parse(&message)?;
    lifecycle.advance(ConnectionState::HeaderParsed);

    let authenticated = prefix.authenticate(&state.credential)?;
    lifecycle.advance(ConnectionState::CredentialOk);

    lifecycle.advance(ConnectionState::Resolving);
    let request = authenticated.resolve()?;

    lifecycle.advance(ConnectionState::Connecting);
    info!(destination = %request.destination, "Connecting");
    let upstream =
        bridge::connect_upstream(&request.destination, state.config.connect_timeout()).await?;

    lifecycle.advance(ConnectionState::Relaying);
    bridge::run_bridge(socket, upstream, request.version, request.payload(&message)).await
}

/// Wait for the first data message. Control frames are skipped.
async fn first_message(socket: &mut WebSocket) -> RelayResult<Vec<u8>> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Binary(data)) => return Ok(data),
            Ok(Message::Text(text)) => return Ok(text.into_bytes()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("WebSocket error before handshake: {}", e);
                break;
            }
        }
    }
    Err(RelayError::ClosedBeforeHandshake)
}
