//! Runtime - shutdown signalling for background tasks

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by a task and whoever stops it.
///
/// Latches: receivers created after `trigger` still observe it.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.sender.subscribe() }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Receiving half of [`Shutdown`].
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered (or every `Shutdown` is dropped).
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Install SIGINT/SIGTERM handlers and return the shutdown handle they trigger.
pub fn install_signal_handlers() -> Shutdown {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "signal handlers unavailable");
                    return;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Ctrl+C handler unavailable");
                return;
            }
            tracing::info!("Received Ctrl+C");
        }

        handle.trigger();
    });

    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscribers_see_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        let mut signal = shutdown.subscribe();
        assert!(signal.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(100), signal.recv()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn recv_waits_for_trigger() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(20), signal.recv()).await;
        assert!(pending.is_err());
        shutdown.trigger();
        signal.recv().await;
        assert!(shutdown.is_triggered());
    }
}
