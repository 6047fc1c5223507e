//! Server configuration.

use clap::Parser;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use wsrelay_core::auth::{ClientCredential, CredentialError};

/// Identifier used when none is configured.
pub const DEFAULT_UUID: &str = "b28f60af-d0b9-4ddf-baaa-7e49c93c380b";

/// Range a listen port is drawn from when none is configured.
const RANDOM_PORT_RANGE: std::ops::RangeInclusive<u16> = 10000..=65000;

/// wsrelay - WebSocket tunnel endpoint relaying to raw TCP destinations.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsrelay-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Client identifier; the 16-byte credential is its hex digits
    #[arg(long, env = "UUID", default_value = DEFAULT_UUID)]
    pub uuid: String,

    /// Listen port (random in 10000-65000 if unset)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Listen address
    #[arg(long, env = "WSRELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Public domain advertised in the share link
    #[arg(long, env = "DOMAIN", default_value = "")]
    pub domain: String,

    /// Display name appended to the share link
    #[arg(long, env = "NAME", default_value = "wsrelay")]
    pub name: String,

    /// Seconds to wait for the handshake message
    #[arg(long, env = "WSRELAY_HANDSHAKE_TIMEOUT", default_value = "10")]
    pub handshake_timeout: u64,

    /// Seconds to wait for the outbound connection
    #[arg(long, env = "WSRELAY_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Seconds to let active tunnels drain on shutdown
    #[arg(long, env = "WSRELAY_SHUTDOWN_TIMEOUT", default_value = "30")]
    pub shutdown_timeout: u64,

    /// Port for the Prometheus metrics listener (disabled if unset)
    #[arg(long, env = "WSRELAY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Enable debug logging
    #[arg(long, env = "WSRELAY_DEBUG")]
    pub debug: bool,
}

impl ServerConfig {
    /// Derive the client credential from the configured identifier.
    pub fn credential(&self) -> Result<ClientCredential, CredentialError> {
        ClientCredential::from_identifier(&self.uuid)
    }

    pub fn uses_default_uuid(&self) -> bool {
        self.uuid == DEFAULT_UUID
    }

    /// Fix the listen port, drawing a random one if none was given.
    pub fn resolve_port(&mut self) -> u16 {
        *self
            .port
            .get_or_insert_with(|| rand::thread_rng().gen_range(RANDOM_PORT_RANGE))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port.unwrap_or(0))
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port
            .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["wsrelay-server"]).unwrap();
        assert!(config.uses_default_uuid());
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.metrics_addr().is_none());
        assert!(config.credential().is_ok());
    }

    #[test]
    fn test_random_port() {
        let mut config = ServerConfig::try_parse_from(["wsrelay-server"]).unwrap();
        config.port = None;
        let port = config.resolve_port();
        assert!(RANDOM_PORT_RANGE.contains(&port));
        assert_eq!(config.resolve_port(), port);
        assert_eq!(config.listen_addr(), format!("0.0.0.0:{}", port));
    }

    #[test]
    fn test_explicit_values() {
        let mut config = ServerConfig::try_parse_from([
            "wsrelay-server",
            "--uuid",
            "00112233445566778899aabbccddeeff",
            "--port",
            "8443",
            "--bind",
            "127.0.0.1",
            "--connect-timeout",
            "3",
        ])
        .unwrap();
        assert!(!config.uses_default_uuid());
        assert_eq!(config.resolve_port(), 8443);
        assert_eq!(config.listen_addr(), "127.0.0.1:8443");
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.credential().unwrap().as_bytes()[15], 0xff);
    }

    #[test]
    fn test_invalid_uuid() {
        let config =
            ServerConfig::try_parse_from(["wsrelay-server", "--uuid", "1234"]).unwrap();
        assert_eq!(config.credential(), Err(CredentialError::InvalidLength(2)));
    }
}
