//! Data subsystem: handlers, execution, deferreds and fetchers.
//!
//! # Data Flow
//! ```text
//! Router (navigation or fetcher):
//!     matches + should-run flags
//!     → executor.rs (DataStrategy: spawn loader/action per flagged route)
//!     → handler.rs contracts (HandlerArgs in, HandlerOutput / RouteError out)
//!     → deferred.rs (pending fields tracked, abort-linked to generation)
//!     → BatchOutcome back to the router
//!
//! Fetchers:
//!     fetcher.rs records (per-key generation + abort) ← router drives them
//!
//! External fetch:
//!     fetch.rs FetchHandler → FetchClient → FetchResponse → HandlerOutput
//! ```
//!
//! # Design Decisions
//! - Route errors are values recorded in state, never panics
//! - Redirects are outputs, not errors

pub mod deferred;
pub mod executor;
pub mod fetch;
pub mod fetcher;
pub mod handler;
pub mod submission;

pub use deferred::{DeferredData, DeferredState, DeferredTracker, DeferredValue, TrackedDeferred};
pub use executor::{BatchOutcome, ConcurrentStrategy, DataBatch, DataResult, DataStrategy, HandlerKind};
pub use fetch::{FetchClient, FetchHandler, FetchRequest, FetchResponse};
pub use fetcher::{Fetcher, FetcherRegistry, FetcherState};
pub use handler::{
    redirect, DataRequest, ErrorResponse, HandlerArgs, HandlerFuture, HandlerOutput, Redirect, RouteError,
    RouteHandler, ShouldRevalidate, ShouldRevalidateArgs,
};
pub use submission::{FormData, FormMethod, Submission};
