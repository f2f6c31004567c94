use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast};

/// Why the gateway is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT
    Signal,
    /// Triggered from code (tests, fatal background failures)
    Requested,
    /// The shutdown channel went away
    Force,
}

/// Broadcasts a single shutdown decision to the server and background tasks.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    /// Upper bound for draining in-flight exchanges once shutdown starts
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 30-second drain timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Start shutdown. Only the first call broadcasts.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("Shutdown initiated: {:?}", reason);
            // No subscribers left means nothing is waiting
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for SIGINT: {}", e);
                    std::future::pending::<()>().await;
                }
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        self.trigger_shutdown(ShutdownReason::Signal);
    }

    /// Token that resolves once shutdown starts, even if it started before the
    /// token was created.
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// A token that can be used to wait for the shutdown signal
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Resolve when shutdown has been triggered
    pub async fn wait_for_shutdown(mut self) -> ShutdownReason {
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Force,
        }
    }
}
