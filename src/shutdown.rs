//! Shutdown coordination.
//!
//! A [`ShutdownSignal`] is a clone-shareable, idempotent trigger; all
//! clones observe the same notification. A [`ConnectionTracker`] counts
//! open connections through RAII tokens so the shutdown sequence can
//! wait for in-flight work to drain. [`ShutdownTrigger`] names which of
//! the two possible events ended the serving loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::broadcast;

use crate::error::ServeError;

/// The event that ends the blocking wait in the main control flow.
///
/// Exactly one trigger is consumed per process lifetime; observing one
/// branch does not cancel or wait on the other.
#[derive(Debug)]
pub enum ShutdownTrigger {
    /// The serve loop terminated unexpectedly.
    FatalServeError(ServeError),

    /// The process received an interrupt or termination signal.
    ExternalInterrupt,
}

/// A signal used to trigger and await shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    /// Whether the signal has fired.
    triggered: Arc<AtomicBool>,

    /// Broadcast sender notifying waiters.
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Fires the signal. Safe to call more than once; only the first
    /// call has an effect.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when the signal fires.
    ///
    /// Completes immediately if the signal already fired.
    pub fn recv(&self) -> ShutdownReceiver {
        let mut receiver = self.sender.subscribe();
        ShutdownReceiver {
            triggered: Arc::clone(&self.triggered),
            recv_fut: Box::pin(async move {
                let _ = receiver.recv().await;
            }),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Future created by [`ShutdownSignal::recv`].
pub struct ShutdownReceiver {
    triggered: Arc<AtomicBool>,
    recv_fut: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.triggered.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        self.recv_fut.as_mut().poll(cx)
    }
}

/// Waits for an interrupt or termination signal from the OS.
///
/// SIGTERM or SIGINT on unix; Ctrl+C elsewhere.
pub async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to wait for Ctrl+C");
        tracing::info!("received Ctrl+C, shutting down");
    }
}

/// Counts open connections during shutdown.
///
/// Each connection holds a [`ConnectionToken`]; when the last token
/// drops, waiters on [`ConnectionTracker::drained`] wake up.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Acquires a token for one connection.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    ///
    /// Completes immediately when nothing is open.
    pub async fn drained(&self) {
        while self.active.load(Ordering::SeqCst) > 0 {
            self.notify.notified().await;
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Token representing one open connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }
}
