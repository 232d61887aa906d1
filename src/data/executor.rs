//! Data strategy executor.
//!
//! # Responsibilities
//! - Invoke the loader or action of every flagged match in one batch
//! - Collect per-route settlements (data, deferred, error)
//! - Short-circuit the batch on the first redirect or on abort
//!
//! # Design Decisions
//! - Each handler runs in its own task: a panic becomes an error on that
//!   route only, and a discarded batch leaves started calls running to
//!   completion without observing their results
//! - The strategy is a trait so callers can replace the scheduling policy
//!
//! # Data Flow
//! ```text
//! DataBatch { matches, flags, kind, request }
//!     → spawn one task per flagged match
//!     → FuturesUnordered, raced against the abort signal
//!     → Redirect (first wins) | Aborted | Settled (match order)
//! ```

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::data::deferred::{DeferredTracker, TrackedDeferred};
use crate::data::handler::{DataRequest, HandlerArgs, HandlerOutput, Redirect, RouteError};
use crate::observability::metrics;
use crate::routing::{RouteId, RouteMatch};

/// Which handler a batch invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Loader,
    Action,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Loader => "loader",
            HandlerKind::Action => "action",
        }
    }
}

/// Settlement of one route in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DataResult {
    Data(Value),
    /// Critical data is ready; the rest resolves in the background.
    Deferred(TrackedDeferred),
    Error(RouteError),
}

impl DataResult {
    pub fn is_error(&self) -> bool {
        matches!(self, DataResult::Error(_))
    }
}

/// Outcome of a whole batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every flagged route settled; entries are in match order.
    Settled(Vec<(RouteId, DataResult)>),
    /// A handler redirected; the rest of the batch is discarded.
    Redirect { route_id: RouteId, redirect: Redirect },
    /// The request signal fired before the batch settled.
    Aborted,
}

/// One unit of work for a strategy.
pub struct DataBatch {
    pub kind: HandlerKind,
    pub matches: Vec<RouteMatch>,
    /// Parallel to `matches`: which ones to invoke.
    pub should_run: Vec<bool>,
    pub request: DataRequest,
    pub tracker: Arc<DeferredTracker>,
}

impl DataBatch {
    /// Ids of the routes this batch invokes.
    pub fn targets(&self) -> impl Iterator<Item = &RouteId> {
        self.matches
            .iter()
            .zip(&self.should_run)
            .filter(|(_, run)| **run)
            .map(|(m, _)| m.route_id())
    }
}

/// Scheduling policy for a batch of handler calls.
pub trait DataStrategy: Send + Sync {
    fn execute(&self, batch: DataBatch) -> BoxFuture<'static, BatchOutcome>;
}

/// Default strategy: every flagged handler runs concurrently.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentStrategy;

impl DataStrategy for ConcurrentStrategy {
    fn execute(&self, batch: DataBatch) -> BoxFuture<'static, BatchOutcome> {
        Box::pin(run_concurrent(batch))
    }
}

enum Settlement {
    Result(DataResult),
    Redirect(Redirect),
}

async fn run_concurrent(batch: DataBatch) -> BatchOutcome {
    let DataBatch {
        kind,
        matches,
        should_run,
        request,
        tracker,
    } = batch;
    let signal = request.signal.clone();
    let mut results: Vec<Option<DataResult>> = vec![None; matches.len()];
    let mut pending = FuturesUnordered::new();

    for (index, m) in matches.iter().enumerate() {
        if !should_run.get(index).copied().unwrap_or(false) {
            continue;
        }
        let handler = match kind {
            HandlerKind::Loader => m.route.capabilities.loader.clone(),
            HandlerKind::Action => m.route.capabilities.action.clone(),
        };
        let Some(handler) = handler else {
            results[index] = Some(DataResult::Error(RouteError::method_not_allowed(
                request.method,
                &request.url.pathname,
                m.route_id(),
            )));
            continue;
        };
        let args = HandlerArgs {
            route_id: m.route_id().clone(),
            params: m.params.clone(),
            request: request.clone(),
        };
        let started = Instant::now();
        let task = tokio::spawn(handler.call(args));
        pending.push(async move { (index, task.await, started) });
    }

    loop {
        tokio::select! {
            biased;
            _ = signal.aborted() => {
                tracing::debug!(kind = kind.as_str(), "Batch aborted");
                return BatchOutcome::Aborted;
            }
            next = pending.next() => {
                let Some((index, joined, started)) = next else {
                    break;
                };
                let route_id = matches[index].route_id().clone();
                let settlement = match joined {
                    Ok(Ok(output)) => settle_output(kind, &route_id, output, &tracker, &request),
                    Ok(Err(error)) => Settlement::Result(DataResult::Error(error)),
                    Err(join_error) => {
                        tracing::error!(route_id = %route_id, kind = kind.as_str(), error = %join_error, "Handler panicked");
                        Settlement::Result(DataResult::Error(RouteError::Panicked(join_error.to_string())))
                    }
                };
                let outcome = match &settlement {
                    Settlement::Redirect(_) => "redirect",
                    Settlement::Result(DataResult::Error(_)) => "error",
                    Settlement::Result(_) => "ok",
                };
                metrics::record_handler(kind.as_str(), outcome, started.elapsed());
                match settlement {
                    Settlement::Redirect(redirect) => {
                        tracing::debug!(route_id = %route_id, location = %redirect.location, "Handler redirected");
                        return BatchOutcome::Redirect { route_id, redirect };
                    }
                    Settlement::Result(result) => results[index] = Some(result),
                }
            }
        }
    }

    BatchOutcome::Settled(
        matches
            .iter()
            .zip(results)
            .filter_map(|(m, r)| r.map(|r| (m.route_id().clone(), r)))
            .collect(),
    )
}

fn settle_output(
    kind: HandlerKind,
    route_id: &RouteId,
    output: HandlerOutput,
    tracker: &DeferredTracker,
    request: &DataRequest,
) -> Settlement {
    match output {
        HandlerOutput::Data(value) => Settlement::Result(DataResult::Data(value)),
        HandlerOutput::Redirect(redirect) => Settlement::Redirect(redirect),
        HandlerOutput::Deferred(_) if kind == HandlerKind::Action => Settlement::Result(DataResult::Error(
            RouteError::bad_request(format!("deferred data is not supported in actions (route \"{route_id}\")")),
        )),
        HandlerOutput::Deferred(data) => Settlement::Result(DataResult::Deferred(tracker.track(
            route_id.clone(),
            data,
            request.signal.clone(),
        ))),
    }
}
