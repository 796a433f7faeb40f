//! Graceful shutdown.
//!
//! [`ShutdownSignal`] stops the accept loop. [`ConnectionTracker`] lets the
//! server wait for in-flight connections before returning. Both are thin
//! wrappers over `tokio::sync::watch`, so late observers see the current state
//! instead of waiting for an edge they already missed.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

/// Cloneable shutdown trigger. Every clone observes the same trigger.
///
/// ```
/// use hermes_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
/// shutdown.trigger();
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        self.state.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    /// Whether shutdown was triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.state.borrow()
    }

    /// Completes once shutdown is triggered, immediately if it already was.
    pub async fn recv(&self) {
        let mut observer = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = observer.wait_for(|triggered| *triggered).await;
    }

    /// A signal triggered by SIGTERM or SIGINT (Ctrl+C elsewhere).
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            if wait_for_os_signal().await {
                trigger.trigger();
            }
        });
        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves `true` when a termination signal arrives, `false` when none can
/// ever be observed.
async fn wait_for_os_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                info!(signal = name, "Termination requested");
                return true;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Ctrl+C unavailable; only an explicit trigger stops the server");
        return false;
    }
    info!(signal = "ctrl_c", "Termination requested");
    true
}

/// Counts live connections.
///
/// ```
/// use hermes_server::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    live: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.live.send_modify(|n| *n += 1);
        ConnectionToken {
            live: Arc::clone(&self.live),
        }
    }

    /// Live connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        *self.live.borrow()
    }

    /// Completes when no connection is left.
    pub async fn drained(&self) {
        let mut observer = self.live.subscribe();
        let _ = observer.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnectionToken {
    live: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.live.send_modify(|n| *n = n.saturating_sub(1));
    }
}
