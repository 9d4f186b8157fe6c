use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio::{signal, sync::watch};

/// Why the server is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered programmatically
    Requested,
}

/// Shutdown latch shared by the signal listener and the server.
///
/// The first trigger wins; later ones are ignored. Subscribers created after the trigger still
/// observe it.
pub struct GracefulShutdown {
    state: watch::Sender<Option<ShutdownReason>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(drain_timeout: Duration) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            drain_timeout,
        }
    }

    /// How long in-flight requests may run once shutdown starts
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_triggered(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Returns `false` when shutdown had already been triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!(?reason, "shutdown initiated");
        } else {
            tracing::debug!(?reason, "shutdown already initiated, ignoring");
        }
        first
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.state.subscribe(),
        }
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown.
    pub async fn listen_for_signals(&self) -> Result<()> {
        let reason = wait_for_os_signal().await?;
        self.trigger(reason);
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> Result<ShutdownReason> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result.wrap_err("Failed to listen for Ctrl+C")?;
            Ok(ShutdownReason::Interrupt)
        }
        _ = sigterm.recv() => Ok(ShutdownReason::Terminate),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> Result<ShutdownReason> {
    signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl+C")?;
    Ok(ShutdownReason::Interrupt)
}

/// Cloneable handle that resolves once shutdown is triggered.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.receiver.borrow()
    }

    pub async fn wait(mut self) -> ShutdownReason {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            // the latch itself is gone
            Err(_) => ShutdownReason::Requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_triggered_initially() {
        let shutdown = GracefulShutdown::default();
        assert!(!shutdown.is_triggered());
        assert_eq!(shutdown.signal().reason(), None);
        assert_eq!(shutdown.drain_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(1));
        assert!(shutdown.trigger(ShutdownReason::Terminate));
        assert!(!shutdown.trigger(ShutdownReason::Interrupt));
        assert_eq!(shutdown.signal().reason(), Some(ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn test_waiters_before_and_after_trigger() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(1));
        let early = shutdown.signal();
        let waiter = tokio::spawn(early.wait());

        shutdown.trigger(ShutdownReason::Requested);

        assert_eq!(waiter.await.unwrap(), ShutdownReason::Requested);
        assert_eq!(shutdown.signal().wait().await, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_dropped_latch_releases_waiters() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(1));
        let signal = shutdown.signal();
        drop(shutdown);
        assert_eq!(signal.wait().await, ShutdownReason::Requested);
    }
}
