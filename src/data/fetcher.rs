//! Fetcher registry.
//!
//! # Responsibilities
//! - Hold one independent state record per fetcher key
//! - Give every load/submit of a key its own generation and abort signal
//! - Drop late settlements of superseded generations
//! - Release fetchers explicitly or when their owning route detaches
//!
//! # Design Decisions
//! - Records live in a `DashMap`; no guard is held while listeners run
//! - A fetcher never supersedes the main navigation or another key
//! - Previous data stays visible while a key is loading again

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::handler::RouteError;
use crate::data::submission::FormMethod;
use crate::lifecycle::abort::{AbortController, AbortSignal};
use crate::navigation::subscribers::{Subscribers, Unsubscribe};
use crate::observability::metrics;
use crate::routing::RouteId;

/// Lifecycle state of one fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherState {
    #[default]
    Idle,
    Loading,
    Submitting,
}

/// Snapshot of one fetcher record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Fetcher {
    pub key: String,
    pub state: FetcherState,
    pub data: Option<Value>,
    pub error: Option<RouteError>,
    /// Route whose view owns this fetcher.
    pub owner: Option<RouteId>,
    /// Route whose handler the last call targeted.
    pub target: Option<RouteId>,
    pub href: Option<String>,
    pub form_method: Option<FormMethod>,
}

/// Identifies one in-flight call of a fetcher key.
#[derive(Debug, Clone)]
pub struct FetcherTicket {
    pub key: String,
    pub generation: u64,
    pub signal: AbortSignal,
}

/// How a fetcher call settled.
#[derive(Debug, Clone, PartialEq)]
pub enum FetcherSettlement {
    Data(Value),
    Error(RouteError),
    /// The handler redirected; the main router takes over.
    Redirected,
}

/// Arguments to `FetcherRegistry::begin`.
#[derive(Debug, Clone)]
pub struct FetcherStart {
    pub owner: Option<RouteId>,
    pub target: Option<RouteId>,
    pub href: String,
    pub form_method: FormMethod,
}

#[derive(Debug)]
struct Entry {
    record: Fetcher,
    generation: u64,
    controller: Option<AbortController>,
}

/// Keyed fetcher records plus their listeners.
#[derive(Debug)]
pub struct FetcherRegistry {
    entries: DashMap<String, Entry>,
    next_generation: AtomicU64,
    listeners: Subscribers<Fetcher>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_generation: AtomicU64::new(1),
            listeners: Subscribers::new(),
        }
    }

    /// Start a new call for `key`, aborting any call already in flight for it.
    pub fn begin(&self, key: &str, start: FetcherStart) -> FetcherTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let controller = AbortController::new();
        let signal = controller.signal();
        let state = if start.form_method.is_mutation() {
            FetcherState::Submitting
        } else {
            FetcherState::Loading
        };

        let snapshot = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                record: Fetcher {
                    key: key.to_string(),
                    ..Fetcher::default()
                },
                generation: 0,
                controller: None,
            });
            if let Some(previous) = entry.controller.take() {
                tracing::debug!(key = %key, generation = entry.generation, "Fetcher call superseded");
                previous.abort();
            }
            entry.generation = generation;
            entry.controller = Some(controller);
            entry.record.state = state;
            entry.record.error = None;
            if start.owner.is_some() {
                entry.record.owner = start.owner;
            }
            entry.record.target = start.target;
            entry.record.href = Some(start.href);
            entry.record.form_method = Some(start.form_method);
            entry.record.clone()
        };

        tracing::debug!(key = %key, generation, state = ?state, "Fetcher started");
        self.publish(&snapshot);
        FetcherTicket {
            key: key.to_string(),
            generation,
            signal,
        }
    }

    /// Return true if `ticket` is still the latest call for its key.
    pub fn is_current(&self, ticket: &FetcherTicket) -> bool {
        self.entries
            .get(&ticket.key)
            .is_some_and(|entry| entry.generation == ticket.generation)
    }

    /// Record the settlement of `ticket`. Returns false, changing nothing,
    /// if the key was released or a newer call superseded this one.
    pub fn finish(&self, ticket: &FetcherTicket, settlement: FetcherSettlement) -> bool {
        let snapshot = {
            let Some(mut entry) = self.entries.get_mut(&ticket.key) else {
                tracing::debug!(key = %ticket.key, "Settlement for released fetcher dropped");
                return false;
            };
            if entry.generation != ticket.generation {
                tracing::debug!(
                    key = %ticket.key,
                    generation = ticket.generation,
                    current = entry.generation,
                    "Stale fetcher settlement dropped"
                );
                return false;
            }
            entry.controller = None;
            entry.record.state = FetcherState::Idle;
            match settlement {
                FetcherSettlement::Data(value) => {
                    entry.record.data = Some(value);
                    entry.record.error = None;
                }
                FetcherSettlement::Error(error) => entry.record.error = Some(error),
                FetcherSettlement::Redirected => {}
            }
            entry.record.clone()
        };
        tracing::debug!(key = %ticket.key, generation = ticket.generation, "Fetcher settled");
        self.publish(&snapshot);
        true
    }

    pub fn get(&self, key: &str) -> Option<Fetcher> {
        self.entries.get(key).map(|entry| entry.record.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Abort any in-flight call and destroy the record.
    pub fn release(&self, key: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        if let Some(controller) = entry.controller {
            controller.abort();
        }
        tracing::debug!(key = %key, "Fetcher released");
        metrics::record_active_fetchers(self.in_flight());
        true
    }

    /// Release every fetcher owned by `route_id`.
    pub fn release_owned_by(&self, route_id: &RouteId) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.record.owner.as_ref() == Some(route_id))
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter(|key| self.release(key)).count()
    }

    /// Abort every in-flight call and drop all records and listeners.
    pub fn clear(&self) {
        for key in self.keys() {
            self.release(&key);
        }
        self.listeners.clear();
    }

    /// Number of fetchers currently loading or submitting.
    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.record.state != FetcherState::Idle)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Observe every fetcher transition.
    pub fn subscribe(&self, listener: impl Fn(&Fetcher) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    fn publish(&self, snapshot: &Fetcher) {
        metrics::record_active_fetchers(self.in_flight());
        self.listeners.notify(snapshot);
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn start(method: FormMethod) -> FetcherStart {
        FetcherStart {
            owner: Some("owner".into()),
            target: Some("target".into()),
            href: "/items".to_string(),
            form_method: method,
        }
    }

    #[test]
    fn test_lifecycle() {
        let registry = FetcherRegistry::new();
        let ticket = registry.begin("k", start(FormMethod::Get));
        assert_eq!(registry.get("k").unwrap().state, FetcherState::Loading);
        assert_eq!(registry.in_flight(), 1);

        assert!(registry.finish(&ticket, FetcherSettlement::Data(json!([1, 2]))));
        let fetcher = registry.get("k").unwrap();
        assert_eq!(fetcher.state, FetcherState::Idle);
        assert_eq!(fetcher.data, Some(json!([1, 2])));
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_superseded_call_is_aborted_and_dropped() {
        let registry = FetcherRegistry::new();
        let first = registry.begin("k", start(FormMethod::Get));
        let second = registry.begin("k", start(FormMethod::Post));
        assert!(first.signal.is_aborted());
        assert!(!second.signal.is_aborted());
        assert_eq!(registry.get("k").unwrap().state, FetcherState::Submitting);

        assert!(!registry.finish(&first, FetcherSettlement::Data(json!("old"))));
        assert!(registry.finish(&second, FetcherSettlement::Error(RouteError::thrown("bad"))));
        let fetcher = registry.get("k").unwrap();
        assert_eq!(fetcher.data, None);
        assert_eq!(fetcher.error, Some(RouteError::thrown("bad")));
    }

    #[test]
    fn test_keys_are_isolated() {
        let registry = FetcherRegistry::new();
        let a = registry.begin("a", start(FormMethod::Get));
        let b = registry.begin("b", start(FormMethod::Get));
        assert!(registry.release("a"));
        assert!(a.signal.is_aborted());
        assert!(!b.signal.is_aborted());
        assert!(!registry.finish(&a, FetcherSettlement::Data(json!(1))));
        assert!(registry.finish(&b, FetcherSettlement::Data(json!(2))));
    }

    #[test]
    fn test_release_owned_by() {
        let registry = FetcherRegistry::new();
        registry.begin("a", start(FormMethod::Get));
        registry.begin(
            "b",
            FetcherStart {
                owner: Some("other".into()),
                ..start(FormMethod::Get)
            },
        );
        assert_eq!(registry.release_owned_by(&"owner".into()), 1);
        assert_eq!(registry.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn test_listeners_see_transitions() {
        let registry = FetcherRegistry::new();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let _handle = registry.subscribe(move |f| sink.lock().unwrap().push(f.state));
        let ticket = registry.begin("k", start(FormMethod::Get));
        registry.finish(&ticket, FetcherSettlement::Redirected);
        assert_eq!(
            *states.lock().unwrap(),
            vec![FetcherState::Loading, FetcherState::Idle]
        );
    }
}
