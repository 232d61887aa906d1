//! Metrics recording.
//!
//! # Responsibilities
//! - Define router metrics (navigations, handler calls, fetchers, deferreds)
//! - Keep macro calls in one place so names and labels stay consistent
//!
//! # Metrics
//! - `router_navigations_total` (counter): navigations by outcome
//! - `router_handler_calls_total` (counter): handler calls by kind, outcome
//! - `router_handler_duration_seconds` (histogram): handler latency by kind
//! - `router_fetchers_active` (gauge): fetchers currently loading or submitting
//! - `router_deferred_settled_total` (counter): deferred values by outcome
//!
//! # Design Decisions
//! - No recorder is installed here; without one every call is a no-op
//! - Labels are static strings only
//! - `set_enabled(false)` turns every helper into a no-op

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Switch recording on or off process-wide.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Record the end of a navigation: `committed`, `superseded`, `redirected`, `failed`.
pub fn record_navigation(outcome: &'static str) {
    if !is_enabled() {
        return;
    }
    counter!("router_navigations_total", "outcome" => outcome).increment(1);
}

/// Record one loader or action call.
pub fn record_handler(kind: &'static str, outcome: &'static str, elapsed: Duration) {
    if !is_enabled() {
        return;
    }
    counter!("router_handler_calls_total", "kind" => kind, "outcome" => outcome).increment(1);
    histogram!("router_handler_duration_seconds", "kind" => kind).record(elapsed.as_secs_f64());
}

pub fn record_active_fetchers(count: usize) {
    if !is_enabled() {
        return;
    }
    gauge!("router_fetchers_active").set(count as f64);
}

pub fn record_deferred(outcome: &'static str) {
    if !is_enabled() {
        return;
    }
    counter!("router_deferred_settled_total", "outcome" => outcome).increment(1);
}
