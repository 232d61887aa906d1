//! Deferred loader values.
//!
//! # Responsibilities
//! - Let a loader return critical data plus futures that settle later
//! - Run those futures in the background, abort-linked to the navigation
//!   generation that produced them
//! - Cancel the deferreds of routes that are reloaded or leave the match chain
//!
//! # Design Decisions
//! - Each pending value is published through a `watch` channel; readers can
//!   poll the current state or await settlement
//! - An aborted value settles to `DeferredState::Aborted`, which readers treat
//!   as frozen rather than as an error

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;

use crate::data::handler::RouteError;
use crate::lifecycle::abort::{AbortController, AbortSignal};
use crate::observability::metrics;
use crate::routing::RouteId;

/// Future backing one deferred key.
pub type DeferredFuture = BoxFuture<'static, Result<Value, RouteError>>;

/// Loader output with some keys left pending.
pub struct DeferredData {
    critical: Value,
    pending: Vec<(String, DeferredFuture)>,
}

impl DeferredData {
    /// Start from the data available immediately.
    pub fn new(critical: Value) -> Self {
        Self {
            critical,
            pending: Vec::new(),
        }
    }

    /// Attach a value that resolves later under `key`.
    pub fn defer<F>(mut self, key: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<Value, RouteError>> + Send + 'static,
    {
        self.pending.push((key.into(), Box::pin(future)));
        self
    }
}

impl fmt::Debug for DeferredData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredData")
            .field("critical", &self.critical)
            .field("pending", &self.pending.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

/// Settlement state of one deferred key.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredState {
    Pending,
    Resolved(Value),
    Rejected(RouteError),
    /// The owning navigation was superseded or the route was left.
    Aborted,
}

impl DeferredState {
    fn label(&self) -> &'static str {
        match self {
            DeferredState::Pending => "pending",
            DeferredState::Resolved(_) => "resolved",
            DeferredState::Rejected(_) => "rejected",
            DeferredState::Aborted => "aborted",
        }
    }
}

/// Read handle on one deferred key.
#[derive(Debug, Clone)]
pub struct DeferredValue {
    rx: watch::Receiver<DeferredState>,
}

impl DeferredValue {
    /// Current state without waiting.
    pub fn state(&self) -> DeferredState {
        self.rx.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.rx.borrow(), DeferredState::Pending)
    }

    /// Wait until the value leaves `Pending`.
    pub async fn settled(&self) -> DeferredState {
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(|s| !matches!(s, DeferredState::Pending)).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| rx.borrow().clone())
    }
}

/// Loader data whose pending keys are being tracked.
#[derive(Clone)]
pub struct TrackedDeferred {
    id: u64,
    route_id: RouteId,
    critical: Value,
    values: BTreeMap<String, DeferredValue>,
    controller: Arc<AbortController>,
}

impl TrackedDeferred {
    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    /// Data that was available when the loader settled.
    pub fn critical(&self) -> &Value {
        &self.critical
    }

    pub fn get(&self, key: &str) -> Option<&DeferredValue> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Return true while any key is still pending.
    pub fn is_pending(&self) -> bool {
        self.values.values().any(|v| !v.is_settled())
    }

    /// Abort every pending key.
    pub fn cancel(&self) {
        self.controller.abort();
    }

    /// Wait for every key and return the critical data merged with resolved
    /// values. Rejected or aborted keys are omitted.
    pub async fn resolve_all(&self) -> Value {
        let mut merged = match &self.critical {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("critical".to_string(), other.clone());
                map
            }
        };
        for (key, value) in &self.values {
            if let DeferredState::Resolved(v) = value.settled().await {
                merged.insert(key.clone(), v);
            }
        }
        Value::Object(merged)
    }
}

impl PartialEq for TrackedDeferred {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for TrackedDeferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedDeferred")
            .field("id", &self.id)
            .field("route_id", &self.route_id)
            .field("critical", &self.critical)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Spawns deferred futures and remembers which ones belong to committed routes.
#[derive(Debug, Default)]
pub struct DeferredTracker {
    next_id: AtomicU64,
    active: DashMap<RouteId, TrackedDeferred>,
}

impl DeferredTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every pending future of `data`. Each one is aborted when either
    /// `generation` or the returned handle's own controller aborts.
    pub fn track(&self, route_id: RouteId, data: DeferredData, generation: AbortSignal) -> TrackedDeferred {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::new(AbortController::new());
        let mut values = BTreeMap::new();

        for (key, future) in data.pending {
            let (tx, rx) = watch::channel(DeferredState::Pending);
            let own = controller.signal();
            let generation = generation.clone();
            let route = route_id.clone();
            let task_key = key.clone();
            tokio::spawn(async move {
                let state = tokio::select! {
                    biased;
                    _ = own.aborted() => DeferredState::Aborted,
                    _ = generation.aborted() => DeferredState::Aborted,
                    res = future => match res {
                        Ok(v) => DeferredState::Resolved(v),
                        Err(e) => DeferredState::Rejected(e),
                    },
                };
                if state == DeferredState::Aborted {
                    tracing::debug!(route_id = %route, key = %task_key, "Deferred value aborted");
                }
                metrics::record_deferred(state.label());
                let _ = tx.send(state);
            });
            values.insert(key, DeferredValue { rx });
        }

        TrackedDeferred {
            id,
            route_id,
            critical: data.critical,
            values,
            controller,
        }
    }

    /// Register a committed deferred as the live one for its route.
    pub fn activate(&self, deferred: TrackedDeferred) {
        if let Some(previous) = self.active.insert(deferred.route_id.clone(), deferred) {
            previous.cancel();
        }
    }

    /// Cancel and forget active deferreds whose route satisfies `predicate`.
    pub fn cancel_where(&self, mut predicate: impl FnMut(&RouteId) -> bool) -> usize {
        let doomed: Vec<RouteId> = self
            .active
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for route_id in &doomed {
            if let Some((_, deferred)) = self.active.remove(route_id) {
                deferred.cancel();
            }
        }
        doomed.len()
    }

    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deferred_resolves_in_background() {
        let tracker = DeferredTracker::new();
        let data = DeferredData::new(json!({"title": "post"})).defer("comments", async { Ok(json!(["a", "b"])) });
        let tracked = tracker.track("post".into(), data, AbortSignal::never());

        assert_eq!(tracked.critical(), &json!({"title": "post"}));
        let state = tracked.get("comments").unwrap().settled().await;
        assert_eq!(state, DeferredState::Resolved(json!(["a", "b"])));
        assert_eq!(tracked.resolve_all().await, json!({"title": "post", "comments": ["a", "b"]}));
    }

    #[tokio::test]
    async fn test_settled_returns_last_state_when_sender_is_gone() {
        let (tx, rx) = watch::channel(DeferredState::Pending);
        let value = DeferredValue { rx };
        drop(tx);
        assert_eq!(value.settled().await, DeferredState::Pending);

        let (tx, rx) = watch::channel(DeferredState::Pending);
        let value = DeferredValue { rx };
        tx.send_replace(DeferredState::Resolved(json!(1)));
        drop(tx);
        assert_eq!(value.settled().await, DeferredState::Resolved(json!(1)));
    }

    #[tokio::test]
    async fn test_generation_abort_freezes_value() {
        let tracker = DeferredTracker::new();
        let generation = AbortController::new();
        let data = DeferredData::new(Value::Null).defer("slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let tracked = tracker.track("r".into(), data, generation.signal());
        generation.abort();
        assert_eq!(tracked.get("slow").unwrap().settled().await, DeferredState::Aborted);
    }

    #[tokio::test]
    async fn test_cancel_where_only_hits_selected_routes() {
        let tracker = DeferredTracker::new();
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, RouteError>(Value::Null)
        };
        let a = tracker.track("a".into(), DeferredData::new(Value::Null).defer("k", slow()), AbortSignal::never());
        let b = tracker.track("b".into(), DeferredData::new(Value::Null).defer("k", slow()), AbortSignal::never());
        tracker.activate(a.clone());
        tracker.activate(b.clone());

        assert_eq!(tracker.cancel_where(|id| id.as_str() == "a"), 1);
        assert_eq!(a.get("k").unwrap().settled().await, DeferredState::Aborted);
        assert!(!b.get("k").unwrap().is_settled());
        assert_eq!(tracker.active_len(), 1);
        tracker.cancel_all();
        assert_eq!(b.get("k").unwrap().settled().await, DeferredState::Aborted);
    }

    #[tokio::test]
    async fn test_rejected_value() {
        let tracker = DeferredTracker::new();
        let data = DeferredData::new(Value::Null).defer("bad", async { Err(RouteError::thrown("nope")) });
        let tracked = tracker.track("r".into(), data, AbortSignal::never());
        assert_eq!(
            tracked.get("bad").unwrap().settled().await,
            DeferredState::Rejected(RouteError::thrown("nope"))
        );
    }
}
