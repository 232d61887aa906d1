//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use route_navigator::data::{HandlerArgs, HandlerOutput, RouteError, RouteHandler};
use route_navigator::navigation::{MemoryHistory, Router, RouterOptions, RouterState};
use route_navigator::routing::RouteDefinition;
use serde_json::{json, Value};
use tokio::sync::Notify;

/// Number of calls a handler received.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A gate a handler waits on until the test opens it.
///
/// `open` stores a permit, so opening before the handler waits is fine.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<Notify>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.notify_one();
    }

    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

/// Loader returning `{"route": id, "call": n, "url": href}` immediately.
pub fn counting_loader(counter: &Counter) -> Arc<dyn RouteHandler> {
    let counter = counter.clone();
    Arc::new(move |args: HandlerArgs| {
        let call = counter.hit();
        async move {
            Ok::<_, RouteError>(HandlerOutput::Data(json!({
                "route": args.route_id.as_str(),
                "call": call,
                "url": args.request.url.to_href(),
            })))
        }
    })
}

/// Loader that waits on `gate` and then returns `value`.
pub fn gated_loader(gate: &Gate, counter: &Counter, value: Value) -> Arc<dyn RouteHandler> {
    let gate = gate.clone();
    let counter = counter.clone();
    Arc::new(move |_: HandlerArgs| {
        counter.hit();
        let gate = gate.clone();
        let value = value.clone();
        async move {
            gate.wait().await;
            Ok::<_, RouteError>(HandlerOutput::Data(value))
        }
    })
}

/// Loader that always fails with `message`.
pub fn failing_loader(message: &'static str) -> Arc<dyn RouteHandler> {
    Arc::new(move |_: HandlerArgs| async move { Err::<HandlerOutput, _>(RouteError::thrown(message)) })
}

/// Handler that redirects to `to`.
pub fn redirecting(to: &'static str) -> Arc<dyn RouteHandler> {
    Arc::new(move |_: HandlerArgs| async move { Ok::<_, RouteError>(route_navigator::data::redirect(to)) })
}

/// Action echoing its form data as an object.
pub fn echo_action(counter: &Counter) -> Arc<dyn RouteHandler> {
    let counter = counter.clone();
    Arc::new(move |args: HandlerArgs| {
        counter.hit();
        async move {
            let fields: serde_json::Map<String, Value> = args
                .request
                .form_data
                .iter()
                .flat_map(|f| f.iter())
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect();
            Ok::<_, RouteError>(HandlerOutput::Data(Value::Object(fields)))
        }
    })
}

pub fn router_with(routes: Vec<RouteDefinition>, href: &str) -> (Arc<Router>, Arc<MemoryHistory>) {
    let history = Arc::new(MemoryHistory::at(href));
    let router = Router::new(RouterOptions::new(routes, history.clone())).unwrap();
    (router, history)
}

/// Record every published snapshot.
pub fn record_states(router: &Router) -> Arc<Mutex<Vec<Arc<RouterState>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    // Dropping the handle keeps the listener registered.
    let _ = router.subscribe(move |state: &Arc<RouterState>| sink.lock().unwrap().push(state.clone()));
    seen
}

/// Poll until `predicate` holds for the router's snapshot.
pub async fn wait_until(router: &Router, predicate: impl Fn(&RouterState) -> bool) -> Arc<RouterState> {
    for _ in 0..200 {
        let state = router.state();
        if predicate(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("router never reached the expected state: {:?}", router.state().location);
}

pub fn data(state: &RouterState, route_id: &str) -> Option<Value> {
    state.loader_data(&route_id.into()).map(|d| d.value().clone())
}
