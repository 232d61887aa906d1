//! Abort signalling for superseded work.
//!
//! # Responsibilities
//! - Hand every navigation, fetcher load and deferred value a signal
//! - Let the owner abort all holders of the signal at once
//!
//! # Design Decisions
//! - Backed by a `watch` channel so late subscribers still observe an abort
//!   that happened before they started waiting
//! - Aborting is idempotent

use tokio::sync::watch;

/// Owner side of an abort signal.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    /// Create a new, not-yet-aborted controller.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort every holder of a signal from this controller.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Return true once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of an abort controller, handed to handlers.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that is never aborted.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Return true if the owning controller has aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the owning controller aborts.
    ///
    /// If the controller is dropped without aborting, this never resolves.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
