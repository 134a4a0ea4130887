//! Shutdown Handler
//!
//! Stops listeners and destination tasks of a worker, or the workers of a
//! supervisor, when a termination signal arrives. Stopping is abrupt:
//! payloads still queued for a backend are dropped, not flushed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared stop flag plus a count of open producer connections.
#[derive(Clone)]
pub struct ShutdownController {
    stopped: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
    stop_tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            stop_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.stop_tx.subscribe()
    }

    /// Signal every subscriber. Idempotent.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("shutting down");
            let _ = self.stop_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once [`ShutdownController::shutdown`] has been called,
    /// including when it was called before this future was created.
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Number of producer connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_connections: Arc::clone(&self.active_connections),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one connection counted while alive.
pub struct ConnectionGuard {
    active_connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for Ctrl+C or SIGTERM, then stop `controller`.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("received Ctrl+C");
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C");
    }

    controller.shutdown();
    Ok(())
}
