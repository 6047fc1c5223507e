//! Relay bridge between an upgraded WebSocket and an outbound TCP stream.
//!
//! After the acknowledgement and any buffered payload, both directions are
//! copied concurrently. The first direction to finish ends the tunnel and
//! both ends are torn down; half-close is not preserved.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};
use wsrelay_core::{response_frame, Destination, Leg, RelayError, RelayResult};

/// Read buffer size for the outbound leg.
pub const BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on each teardown step once a leg has finished.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes moved by a finished tunnel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// WebSocket peer to destination, including the initial payload.
    pub uplink: u64,
    /// Destination to WebSocket peer.
    pub downlink: u64,
}

/// Open the outbound connection. No retry is attempted.
pub async fn connect_upstream(
    destination: &Destination,
    connect_timeout: Duration,
) -> RelayResult<TcpStream> {
    let target = destination.to_string();
    let host = destination.host();

    let connect = TcpStream::connect((host.as_str(), destination.port));
    let stream = match timeout(connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(RelayError::UpstreamConnectFailed { target, source }),
        Err(_) => {
            return Err(RelayError::UpstreamConnectFailed {
                target,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on {}: {}", target, e);
    }
    Ok(stream)
}

/// Acknowledge the handshake, forward the buffered payload, then relay until
/// either side closes.
pub async fn run_bridge(
    socket: WebSocket,
    upstream: TcpStream,
    version: u8,
    initial_payload: &[u8],
) -> RelayResult<RelayStats> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut up_rx, mut up_tx) = upstream.into_split();

    ws_tx
        .send(Message::Binary(response_frame(version).to_vec()))
        .await
        .map_err(|e| RelayError::leg(Leg::OutboundToInbound, io::Error::other(e)))?;

    if !initial_payload.is_empty() {
        up_tx
            .write_all(initial_payload)
            .await
            .map_err(|e| RelayError::leg(Leg::InboundToOutbound, e))?;
        trace!("Forwarded {} bytes of initial payload", initial_payload.len());
    }

    let mut stats = RelayStats {
        uplink: initial_payload.len() as u64,
        downlink: 0,
    };

    let outcome = {
        let uplink = copy_inbound(&mut ws_rx, &mut up_tx, &mut stats.uplink);
        let downlink = copy_outbound(&mut up_rx, &mut ws_tx, &mut stats.downlink);

        tokio::select! {
            result = uplink => {
                debug!("{} leg finished", Leg::InboundToOutbound);
                result.map_err(|e| RelayError::leg(Leg::InboundToOutbound, e))
            }
            result = downlink => {
                debug!("{} leg finished", Leg::OutboundToInbound);
                result.map_err(|e| RelayError::leg(Leg::OutboundToInbound, e))
            }
        }
    };

    // Tear down both ends regardless of which leg ended.
    match timeout(TEARDOWN_TIMEOUT, ws_tx.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("WebSocket close failed: {}", e),
        Err(_) => debug!("WebSocket close timed out"),
    }
    match timeout(TEARDOWN_TIMEOUT, up_tx.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Upstream shutdown failed: {}", e),
        Err(_) => debug!("Upstream shutdown timed out"),
    }

    outcome.map(|()| stats)
}

async fn copy_inbound(
    ws_rx: &mut SplitStream<WebSocket>,
    up_tx: &mut OwnedWriteHalf,
    copied: &mut u64,
) -> io::Result<()> {
    while let Some(message) = ws_rx.next().await {
        let data = match message.map_err(io::Error::other)? {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        up_tx.write_all(&data).await?;
        *copied += data.len() as u64;
    }
    Ok(())
}

async fn copy_outbound(
    up_rx: &mut OwnedReadHalf,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    copied: &mut u64,
) -> io::Result<()> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = up_rx.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        ws_tx
            .send(Message::Binary(buf[..n].to_vec()))
            .await
            .map_err(io::Error::other)?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wsrelay_core::Address;

    #[tokio::test]
    async fn test_connect_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let destination = Destination::new(Address::Ipv4([127, 0, 0, 1]), port);

        let stream = connect_upstream(&destination, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let destination = Destination::new(Address::Ipv4([127, 0, 0, 1]), port);
        let err = connect_upstream(&destination, Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            RelayError::UpstreamConnectFailed { target, .. } => {
                assert_eq!(target, format!("127.0.0.1:{}", port));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
