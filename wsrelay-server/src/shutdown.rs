//! Tunnel accounting and drain on shutdown.
//!
//! Upgraded tunnels outlive the HTTP server, so every supervisor holds a
//! [`TunnelGuard`] for its whole lifetime. The active count lives in a
//! `watch` channel: dropping the last guard wakes [`TunnelTracker::drain`]
//! directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

struct Inner {
    draining: AtomicBool,
    active: watch::Sender<usize>,
    drain_timeout: Duration,
}

impl Inner {
    fn adjust(&self, update: impl FnOnce(&mut usize)) {
        self.active.send_modify(update);
        let active = *self.active.borrow();
        crate::metrics::record_active_tunnels(active);
        debug!("Active tunnels: {}", active);
    }
}

/// Shared view of the running tunnels.
#[derive(Clone)]
pub struct TunnelTracker {
    inner: Arc<Inner>,
}

impl TunnelTracker {
    pub fn new(drain_timeout: Duration) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                draining: AtomicBool::new(false),
                active,
                drain_timeout,
            }),
        }
    }

    /// Count a tunnel until the returned guard is dropped.
    pub fn track(&self) -> TunnelGuard {
        self.inner.adjust(|n| *n += 1);
        TunnelGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Once set, new upgrades are refused.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    pub fn start_draining(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            info!("Draining {} active tunnels", self.active());
        }
    }

    /// Wait for the active count to reach zero. Returns `false` if the drain
    /// timeout expired first.
    pub async fn drain(&self) -> bool {
        self.start_draining();
        let mut active = self.inner.active.subscribe();
        let drained = match timeout(self.inner.drain_timeout, active.wait_for(|n| *n == 0)).await {
            // The sender lives in `inner`, so the channel cannot close here.
            Ok(_) => {
                info!("All tunnels drained");
                true
            }
            Err(_) => {
                warn!(
                    "Drain timeout of {:?} reached with {} tunnels still active",
                    self.inner.drain_timeout,
                    self.active()
                );
                false
            }
        };
        drained
    }
}

/// Held by a supervisor for as long as its tunnel runs.
pub struct TunnelGuard {
    inner: Arc<Inner>,
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.inner.adjust(|n| *n = n.saturating_sub(1));
    }
}

/// Resolve on Ctrl+C or SIGTERM. A handler that fails to install is logged
/// and never fires.
pub async fn signal_received() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
