//! Graceful shutdown on SIGINT/SIGTERM.
//!
//! The first signal requests a graceful stop: the controller aborts the
//! in-flight invocation, persists state, and writes the summary with an
//! `interrupted` exit reason. A second signal exits immediately with the
//! conventional 130 status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Shared shutdown flag, cloneable across tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a shutdown handle with no listener attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Spawn the OS signal listener.
    ///
    /// First SIGINT or SIGTERM flips the flag and wakes waiters; a second
    /// signal exits the process immediately.
    pub fn install(&self) {
        let requested = Arc::clone(&self.requested);
        let notify = Arc::clone(&self.notify);

        tokio::spawn(async move {
            loop {
                wait_for_signal().await;
                if requested.swap(true, Ordering::SeqCst) {
                    warn!("second interrupt, exiting immediately");
                    std::process::exit(130);
                }
                info!("shutdown requested, finishing up (interrupt again to force quit)");
                notify.notify_waiters();
            }
        });
    }

    /// Request shutdown programmatically (tests).
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested.
    pub async fn requested(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // A `Notified` only registers with `notify_waiters` once polled, so
        // enable it before the flag check or a wakeup in between is lost.
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGINT handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
