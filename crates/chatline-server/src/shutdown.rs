//! Signal-driven shutdown with connection draining.
//!
//! The controller hands out a [`CancellationToken`] that fires when the
//! server should stop accepting work, and a [`DrainGuard`] per live
//! WebSocket connection. [`ShutdownController::drain`] waits for every guard
//! to drop, bounded by the grace period.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct DrainState {
    active: AtomicUsize,
    idle: Notify,
}

/// Held by a connection for as long as it is being served.
pub struct DrainGuard {
    state: Arc<DrainState>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.state.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

/// Coordinates stop and drain for the whole server.
#[derive(Clone)]
pub struct ShutdownController {
    stop: CancellationToken,
    state: Arc<DrainState>,
    grace: Duration,
}

impl ShutdownController {
    pub fn new(grace: Duration) -> Self {
        Self {
            stop: CancellationToken::new(),
            state: Arc::new(DrainState {
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            grace,
        }
    }

    /// Token cancelled once shutdown begins.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Begin shutdown without waiting for a signal.
    pub fn trigger(&self) {
        self.stop.cancel();
    }

    /// Track one more live connection.
    pub fn guard(&self) -> DrainGuard {
        self.state.active.fetch_add(1, Ordering::SeqCst);
        DrainGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn listen_for_signals(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
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
                    error!(error = %e, "Failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
            _ = self.stop.cancelled() => return,
        }
        self.trigger();
    }

    /// Wait for live connections to finish.
    ///
    /// Returns `true` if everything drained before the grace period ran out.
    pub async fn drain(&self) -> bool {
        let active = self.active_connections();
        if active == 0 {
            info!("No active connections, drain complete");
            return true;
        }

        info!(
            active_connections = active,
            grace_secs = self.grace.as_secs(),
            "Draining active connections"
        );
        match tokio::time::timeout(self.grace, self.wait_idle()).await {
            Ok(()) => {
                info!("All connections drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining_connections = self.active_connections(),
                    "Grace period expired with connections still open"
                );
                false
            }
        }
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.state.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.active_connections() == 0 {
                return;
            }
            idle.await;
        }
    }
}
