//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Navigation / fetcher start:
//!     new AbortController → signal handed to every handler and deferred
//!
//! Superseded or disposed:
//!     controller.abort() → handlers observe the signal, batches discard
//!     results, deferreds settle as Aborted
//! ```
//!
//! # Design Decisions
//! - Cancellation is cooperative: nothing is forcibly killed
//! - Mutex poisoning is recovered; router state stays usable after a panic
//!   in a listener

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod abort;

pub use abort::{AbortController, AbortSignal};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
