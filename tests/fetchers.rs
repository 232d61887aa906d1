//! Fetcher tests: out-of-band loads and submissions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use route_navigator::data::{
    DeferredData, FetcherState, FormData, FormMethod, HandlerArgs, HandlerOutput, RouteError,
};
use route_navigator::navigation::FetchOptions;
use route_navigator::routing::RouteDefinition;
use serde_json::json;

mod common;

use common::{counting_loader, data, echo_action, gated_loader, redirecting, router_with, Counter, Gate};

#[tokio::test]
async fn test_fetcher_load_does_not_navigate() {
    let (root, items) = (Counter::new(), Counter::new());
    let routes = vec![RouteDefinition::new("/")
        .id("root")
        .loader_handler(counting_loader(&root))
        .child(RouteDefinition::new("items").id("items").loader_handler(counting_loader(&items)))];
    let (router, history) = router_with(routes, "/");
    router.initialize().await.unwrap();

    let fetcher = router.fetch("list", "/items", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.state, FetcherState::Idle);
    assert_eq!(fetcher.target.as_ref().map(|id| id.as_str()), Some("items"));
    assert_eq!(fetcher.data.unwrap()["route"], json!("items"));
    assert_eq!(items.get(), 1);
    assert_eq!(root.get(), 1);
    assert_eq!(router.state().location.pathname, "/");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_fetcher_submission_revalidates_idle_router() {
    let (root, action) = (Counter::new(), Counter::new());
    let routes = vec![RouteDefinition::new("/")
        .id("root")
        .loader_handler(counting_loader(&root))
        .child(RouteDefinition::new("items").id("items").action_handler(echo_action(&action)))];
    let (router, _history) = router_with(routes, "/");
    router.initialize().await.unwrap();

    let form = FormData::new().with("title", "new");
    let fetcher = router
        .fetch("add", "/items", FetchOptions::submit(FormMethod::Post, form))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fetcher.data, Some(json!({"title": "new"})));
    assert_eq!(fetcher.form_method, Some(FormMethod::Post));
    assert_eq!(action.get(), 1);
    assert_eq!(root.get(), 2);
    assert_eq!(data(&router.state(), "root").unwrap()["call"], json!(2));
}

#[tokio::test]
async fn test_fetcher_errors_stay_in_record() {
    let routes = vec![RouteDefinition::new("/")
        .id("root")
        .error_boundary(true)
        .child(RouteDefinition::new("plain").id("plain"))];
    let (router, _history) = router_with(routes, "/");

    let fetcher = router
        .fetch("f", "/plain", FetchOptions::submit(FormMethod::Delete, FormData::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetcher.error.as_ref().and_then(RouteError::status), Some(405));

    let fetcher = router.fetch("f", "/missing", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.error.as_ref().and_then(RouteError::status), Some(404));
    assert!(fetcher.target.is_none());

    let fetcher = router.fetch("f", "/plain", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.error.as_ref().and_then(RouteError::status), Some(400));

    assert!(router.state().errors.is_none());
}

#[tokio::test]
async fn test_index_leaf_needs_index_param() {
    let (parent, index) = (Counter::new(), Counter::new());
    let routes = vec![RouteDefinition::new("items")
        .id("items")
        .loader_handler(counting_loader(&parent))
        .child(RouteDefinition::index().id("items-index").loader_handler(counting_loader(&index)))];
    let (router, _history) = router_with(routes, "/items");

    let fetcher = router.fetch("a", "/items", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.data.unwrap()["route"], json!("items"));
    let fetcher = router.fetch("b", "/items?index", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.data.unwrap()["route"], json!("items-index"));
    assert_eq!((parent.get(), index.get()), (1, 1));
}

#[tokio::test]
async fn test_same_key_supersedes_previous_call() {
    let gate = Gate::new();
    let slow_calls = Counter::new();
    let fast = Counter::new();
    let routes = vec![RouteDefinition::new("/")
        .id("root")
        .child(
            RouteDefinition::new("slow")
                .id("slow")
                .loader_handler(gated_loader(&gate, &slow_calls, json!("slow"))),
        )
        .child(RouteDefinition::new("fast").id("fast").loader_handler(counting_loader(&fast)))];
    let (router, _history) = router_with(routes, "/");

    let r = router.clone();
    let first = tokio::spawn(async move { r.fetch("k", "/slow", FetchOptions::default()).await });
    for _ in 0..100 {
        if slow_calls.get() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let second = router.fetch("k", "/fast", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(second.data.as_ref().unwrap()["route"], json!("fast"));
    first.await.unwrap().unwrap();

    gate.open();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = router.fetcher("k").unwrap();
    assert_eq!(record.data.unwrap()["route"], json!("fast"));
    assert_eq!(record.state, FetcherState::Idle);
}

#[tokio::test]
async fn test_fetcher_redirect_navigates_router() {
    let done = Counter::new();
    let routes = vec![RouteDefinition::new("/")
        .id("root")
        .child(RouteDefinition::new("go").id("go").loader_handler(redirecting("/done")))
        .child(RouteDefinition::new("done").id("done").loader_handler(counting_loader(&done)))];
    let (router, history) = router_with(routes, "/");

    let fetcher = router.fetch("r", "/go", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.state, FetcherState::Idle);
    assert!(fetcher.data.is_none());
    assert_eq!(router.state().location.pathname, "/done");
    assert_eq!(done.get(), 1);
    assert_eq!(history.hrefs(), vec!["/", "/done"]);
}

#[tokio::test]
async fn test_fetcher_waits_for_deferred_values() {
    let routes = vec![RouteDefinition::new("/").id("root").child(RouteDefinition::new("stats").id("stats").loader(
        |_: HandlerArgs| async move {
            let data = DeferredData::new(json!({"count": 1})).defer("slow", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!(42))
            });
            Ok::<_, RouteError>(HandlerOutput::Deferred(data))
        },
    ))];
    let (router, _history) = router_with(routes, "/");

    let fetcher = router.fetch("s", "/stats", FetchOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetcher.data, Some(json!({"count": 1, "slow": 42})));
}

#[tokio::test]
async fn test_detach_releases_owned_fetchers() {
    let gate = Gate::new();
    let routes = vec![RouteDefinition::new("/").id("root").child(
        RouteDefinition::new("slow")
            .id("slow")
            .loader_handler(gated_loader(&gate, &Counter::new(), json!(1))),
    )];
    let (router, _history) = router_with(routes, "/");
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = transitions.clone();
    let _ = router.subscribe_fetchers(move |f| sink.lock().unwrap().push(f.state));

    let r = router.clone();
    let call = tokio::spawn(async move { r.fetch("owned", "/slow", FetchOptions::default().owner("root")).await });
    for _ in 0..100 {
        if router.fetcher("owned").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(router.detach_route(&"root".into()), 1);
    assert!(call.await.unwrap().unwrap().is_none());
    assert!(router.fetcher("owned").is_none());
    assert_eq!(*transitions.lock().unwrap(), vec![FetcherState::Loading]);
}
