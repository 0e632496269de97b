use std::{
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tokio::{signal, sync::broadcast, time::timeout};

/// Why the gateway is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// Triggered from code (tests, embedding applications)
    Requested,
    /// Shutdown channel closed without a reason
    Force,
}

/// Fans a single shutdown event out to every interested task and bounds the
/// connection drain that follows it.
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    /// Set once, by the first trigger.
    reason: Arc<OnceLock<ShutdownReason>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            reason: Arc::new(OnceLock::new()),
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Start shutdown. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_ok() {
            tracing::info!(reason = ?reason, "Shutdown initiated");
            let _ = self.shutdown_tx.send(reason);
            true
        } else {
            tracing::debug!(reason = ?reason, "Shutdown already initiated, ignoring");
            false
        }
    }

    /// Wait for SIGINT/SIGTERM and trigger shutdown.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                tracing::info!("Received SIGINT");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM");
            }
        }

        self.trigger_shutdown(ShutdownReason::Signal);
    }

    /// Resolve once shutdown has been triggered, including before this call.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if let Some(reason) = self.reason.get() {
            return *reason;
        }

        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!("Shutdown channel closed unexpectedly");
                ShutdownReason::Force
            }
        }
    }

    /// Run `drain` for at most the drain timeout. `None` if it had to be cut short.
    pub async fn drain<F: Future>(&self, drain: F) -> Option<F::Output> {
        match timeout(self.drain_timeout, drain).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain timeout exceeded, forcing shutdown"
                );
                None
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
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
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
