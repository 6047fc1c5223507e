//! Prometheus metrics for the relay.
//!
//! Recording is a no-op until [`install_exporter`] has run.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use wsrelay_core::RelayError;

/// Start the Prometheus scrape listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Metrics listening on {}", addr);
    Ok(())
}

/// Record an upgraded connection.
pub fn record_connection_accepted() {
    counter!("wsrelay_connections_total").increment(1);
}

pub fn record_active_tunnels(active: usize) {
    gauge!("wsrelay_active_connections").set(active as f64);
}

/// Record a connection that ended in failure.
pub fn record_failure(error: &RelayError) {
    match error {
        RelayError::UpstreamConnectFailed { .. } => {
            counter!("wsrelay_upstream_failures_total").increment(1);
        }
        RelayError::RelayLeg { leg, .. } => {
            counter!("wsrelay_relay_errors_total", "leg" => leg.to_string()).increment(1);
        }
        _ => {
            counter!("wsrelay_rejected_total", "reason" => error.reason()).increment(1);
        }
    }
}

/// Record bytes relayed by a finished tunnel.
pub fn record_relayed(uplink: u64, downlink: u64) {
    counter!("wsrelay_bytes_total", "direction" => "uplink").increment(uplink);
    counter!("wsrelay_bytes_total", "direction" => "downlink").increment(downlink);
}
