//! Navigation state machine.
//!
//! # Responsibilities
//! - Own the route tree and the current `RouterState` snapshot
//! - Drive navigations: match, submit, load, commit
//! - Supersede older generations and discard their late results
//! - Follow redirects without publishing intermediate state
//! - Drive fetchers through the same matcher and executor
//!
//! # Design Decisions
//! - Snapshots live in an `ArcSwap`; readers never block
//! - A single mutex guards the generation counter and the pending
//!   navigation; it is never held across an `.await`
//! - Every commit re-checks the generation under that mutex, so only the
//!   latest navigation can replace the snapshot
//! - Listeners are notified outside the mutex
//!
//! # Data Flow
//! ```text
//! navigate(to, opts)
//!     → resolve target (route- or path-relative, basename applied)
//!     → begin generation (abort previous pending navigation)
//!     → match_routes ── none ──→ 404 at nearest boundary → commit
//!     → hash-only change ──────→ commit, no loaders
//!     → [submitting] action of deepest route with one
//!     → [loading] matches_to_load → DataStrategy batch
//!     → redirect? restart at target (new generation, limit applies)
//!     → bubble errors, merge loader data → commit → notify once
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::data::deferred::{DeferredTracker, TrackedDeferred};
use crate::data::executor::{BatchOutcome, ConcurrentStrategy, DataBatch, DataResult, DataStrategy, HandlerKind};
use crate::data::fetcher::{Fetcher, FetcherRegistry, FetcherSettlement, FetcherStart};
use crate::data::handler::{DataRequest, Redirect, RouteError};
use crate::data::submission::{FormData, FormMethod, Submission};
use crate::error::{RouterError, RouterResult};
use crate::lifecycle::abort::{AbortController, AbortSignal};
use crate::lifecycle::lock;
use crate::navigation::boundary::{find_nearest_boundary, PlacedErrors};
use crate::navigation::history::{History, HistoryAction, HistoryUpdate};
use crate::navigation::location::{normalize_search, Location, Path};
use crate::navigation::revalidation::{matches_to_load, LoadPlan};
use crate::navigation::state::{HydrationData, Navigation, NavigationStatus, RevalidationState, RouteData, RouterState};
use crate::navigation::subscribers::{Subscribers, Unsubscribe};
use crate::observability::metrics;
use crate::routing::flatten::join_paths;
use crate::routing::resolve::resolve_to_pathnames;
use crate::routing::{
    match_partial, match_routes, resolve_to, strip_basename, RelativeRouting, RouteDefinition, RouteId, RouteMatch,
    RouteTree,
};

/// Default cap on consecutive redirects in one navigation.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Everything needed to construct a router.
pub struct RouterOptions {
    pub routes: Vec<RouteDefinition>,
    pub history: Arc<dyn History>,
    pub basename: Option<String>,
    pub hydration_data: Option<HydrationData>,
    pub data_strategy: Option<Arc<dyn DataStrategy>>,
    pub max_redirects: u32,
}

impl RouterOptions {
    pub fn new(routes: Vec<RouteDefinition>, history: Arc<dyn History>) -> Self {
        Self {
            routes,
            history,
            basename: None,
            hydration_data: None,
            data_strategy: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = Some(basename.into());
        self
    }

    pub fn hydration_data(mut self, data: HydrationData) -> Self {
        self.hydration_data = Some(data);
        self
    }

    pub fn data_strategy(mut self, strategy: Arc<dyn DataStrategy>) -> Self {
        self.data_strategy = Some(strategy);
        self
    }

    pub fn max_redirects(mut self, limit: u32) -> Self {
        self.max_redirects = limit;
        self
    }
}

/// Options of a single `navigate` call.
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    pub replace: bool,
    pub state: Option<Value>,
    pub form_method: Option<FormMethod>,
    pub form_data: Option<FormData>,
    pub relative: RelativeRouting,
    /// Resolve relative targets from this matched route instead of the leaf.
    pub from_route_id: Option<RouteId>,
}

impl NavigateOptions {
    pub fn replace() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }

    /// A form submission with `method`.
    pub fn submit(method: FormMethod, form_data: FormData) -> Self {
        Self {
            form_method: Some(method),
            form_data: Some(form_data),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn relative(mut self, relative: RelativeRouting) -> Self {
        self.relative = relative;
        self
    }

    pub fn from_route(mut self, route_id: impl Into<RouteId>) -> Self {
        self.from_route_id = Some(route_id.into());
        self
    }
}

/// Options of a single fetcher call.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Route whose view owns the fetcher; relative hrefs resolve from it.
    pub owner: Option<RouteId>,
    pub form_method: Option<FormMethod>,
    pub form_data: Option<FormData>,
}

impl FetchOptions {
    pub fn submit(method: FormMethod, form_data: FormData) -> Self {
        Self {
            form_method: Some(method),
            form_data: Some(form_data),
            ..Self::default()
        }
    }

    pub fn owner(mut self, route_id: impl Into<RouteId>) -> Self {
        self.owner = Some(route_id.into());
        self
    }
}

/// How a navigation call ended.
#[derive(Debug, Clone)]
pub enum NavigationOutcome {
    /// This call's generation produced the published snapshot.
    Committed(Arc<RouterState>),
    /// A newer navigation took over before this one committed.
    Superseded,
    /// Nothing started; the in-flight submission will load fresh data.
    Pending,
}

impl NavigationOutcome {
    pub fn committed(&self) -> Option<&Arc<RouterState>> {
        match self {
            NavigationOutcome::Committed(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, NavigationOutcome::Superseded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Navigate(HistoryAction),
    /// Reload data for the current location without touching history.
    Revalidate,
}

#[derive(Debug)]
struct PendingNavigation {
    generation: u64,
    controller: AbortController,
    mode: Mode,
    location: Location,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    pending: Option<PendingNavigation>,
}

enum Step {
    Done(NavigationOutcome),
    Redirect { target: Path, redirect: Redirect },
}

struct Commit {
    mode: Mode,
    location: Location,
    matches: Vec<RouteMatch>,
    loader_data: BTreeMap<RouteId, RouteData>,
    action_data: Option<BTreeMap<RouteId, Value>>,
    errors: Option<BTreeMap<RouteId, RouteError>>,
    fatal_error: Option<RouteError>,
    reloaded: HashSet<RouteId>,
    deferreds: Vec<TrackedDeferred>,
}

/// A router instance: explicitly constructed, explicitly disposed.
pub struct Router {
    basename: String,
    max_redirects: u32,
    history: Arc<dyn History>,
    strategy: Arc<dyn DataStrategy>,
    tree: ArcSwap<RouteTree>,
    state: ArcSwap<RouterState>,
    inner: Mutex<Inner>,
    subscribers: Subscribers<Arc<RouterState>>,
    fetchers: FetcherRegistry,
    deferreds: Arc<DeferredTracker>,
    history_listener: Mutex<Option<Unsubscribe>>,
    disposed: AtomicBool,
}

impl Router {
    /// Build the route tree, seed state from the history location and
    /// hydration data, and start listening for history traversals.
    pub fn new(options: RouterOptions) -> RouterResult<Arc<Self>> {
        let tree = RouteTree::new(options.routes)?;
        let basename = normalize_basename(options.basename.as_deref());
        let location = options.history.location();
        let hydration = options.hydration_data.unwrap_or_default();

        let loader_data: BTreeMap<RouteId, RouteData> = hydration
            .loader_data
            .into_iter()
            .map(|(id, value)| (id, RouteData::Ready(value)))
            .collect();

        let (matches, errors, fatal_error, initialized) =
            match match_routes(&tree, &location.pathname, Some(&basename)) {
                Some(matches) => {
                    let errors = hydration.errors;
                    let initialized = matches.iter().all(|m| {
                        !m.route.capabilities.has_loader()
                            || loader_data.contains_key(m.route_id())
                            || errors.as_ref().is_some_and(|e| e.contains_key(m.route_id()))
                    });
                    (matches, errors, None, initialized)
                }
                None => {
                    let (matches, placed) = not_found(&tree, &location.pathname, &basename);
                    let (errors, fatal) = placed.into_parts();
                    (matches, errors, fatal, true)
                }
            };

        tracing::info!(
            routes = tree.len(),
            basename = %basename,
            location = %location.href(),
            initialized,
            "Router created"
        );

        let state = RouterState {
            history_action: options.history.action(),
            location,
            matches,
            initialized,
            navigation: Navigation::idle(),
            revalidation: RevalidationState::Idle,
            loader_data,
            action_data: hydration.action_data,
            errors,
            fatal_error,
            generation: 0,
        };

        let router = Arc::new(Self {
            basename,
            max_redirects: options.max_redirects,
            history: options.history,
            strategy: options.data_strategy.unwrap_or_else(|| Arc::new(ConcurrentStrategy)),
            tree: ArcSwap::from_pointee(tree),
            state: ArcSwap::from_pointee(state),
            inner: Mutex::new(Inner::default()),
            subscribers: Subscribers::new(),
            fetchers: FetcherRegistry::new(),
            deferreds: Arc::new(DeferredTracker::new()),
            history_listener: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&router);
        let handle = router.history.listen(Box::new(move |update: &HistoryUpdate| {
            if let Some(router) = weak.upgrade() {
                router.on_history_pop(update);
            }
        }));
        *lock(&router.history_listener) = Some(handle);
        Ok(router)
    }

    /// Run the loaders the hydration data did not cover.
    pub async fn initialize(self: &Arc<Self>) -> RouterResult<NavigationOutcome> {
        self.ensure_live()?;
        let current = self.state();
        if current.initialized {
            return Ok(NavigationOutcome::Committed(current));
        }
        let location = current.location.clone();
        self.run(Mode::Navigate(HistoryAction::Pop), location, None, false).await
    }

    /// Navigate to `to`, which may be absolute or relative.
    pub async fn navigate(self: &Arc<Self>, to: &str, opts: NavigateOptions) -> RouterResult<NavigationOutcome> {
        self.ensure_live()?;
        let current = self.state();
        let path = self.resolve_target(&current, to, opts.from_route_id.as_ref(), opts.relative)?;
        let (path, submission) = apply_submission(path, opts.form_method, opts.form_data);

        let action = if opts.replace || (submission.is_some() && path.to_href() == current.location.href()) {
            HistoryAction::Replace
        } else {
            HistoryAction::Push
        };
        let location = Location::new(path, opts.state);
        self.run(Mode::Navigate(action), location, submission, false).await
    }

    /// Move through history; the traversal re-enters as a `Pop` navigation.
    pub fn go(&self, delta: isize) -> RouterResult<()> {
        self.ensure_live()?;
        self.history.go(delta);
        Ok(())
    }

    /// Re-run loaders for the current location, forcing every route that
    /// does not opt out.
    pub async fn revalidate(self: &Arc<Self>) -> RouterResult<NavigationOutcome> {
        self.ensure_live()?;
        let current = self.state();
        match current.navigation.state {
            NavigationStatus::Submitting => Ok(NavigationOutcome::Pending),
            NavigationStatus::Loading => {
                let pending = lock(&self.inner)
                    .pending
                    .as_ref()
                    .map(|p| (p.mode, p.location.clone()));
                match pending {
                    Some((mode, location)) => self.run(mode, location, None, true).await,
                    None => self.run(Mode::Revalidate, current.location.clone(), None, true).await,
                }
            }
            NavigationStatus::Idle => self.run(Mode::Revalidate, current.location.clone(), None, true).await,
        }
    }

    /// Load or submit through fetcher `key`. Returns the fetcher record after
    /// the call settles, or `None` if the key was released meanwhile.
    pub async fn fetch(self: &Arc<Self>, key: &str, href: &str, opts: FetchOptions) -> RouterResult<Option<Fetcher>> {
        self.ensure_live()?;
        let current = self.state();
        let path = self.resolve_target(&current, href, opts.owner.as_ref(), RelativeRouting::Route)?;
        let (path, submission) = apply_submission(path, opts.form_method, opts.form_data);
        let method = submission.as_ref().map_or(FormMethod::Get, |s| s.method);
        let kind = if submission.is_some() {
            HandlerKind::Action
        } else {
            HandlerKind::Loader
        };

        let tree = self.tree.load_full();
        let matches = match_routes(&tree, &path.pathname, Some(&self.basename));
        let target = matches.as_deref().and_then(|m| fetcher_target(m, &path.search));
        let ticket = self.fetchers.begin(
            key,
            FetcherStart {
                owner: opts.owner,
                target: matches
                    .as_ref()
                    .zip(target)
                    .map(|(m, index)| m[index].route_id().clone()),
                href: path.to_href(),
                form_method: method,
            },
        );

        let (Some(matches), Some(index)) = (matches, target) else {
            self.fetchers.finish(
                &ticket,
                FetcherSettlement::Error(RouteError::not_found(&path.pathname)),
            );
            return Ok(self.fetchers.get(key));
        };

        let capabilities = &matches[index].route.capabilities;
        let missing = match kind {
            HandlerKind::Action if !capabilities.has_action() => Some(RouteError::method_not_allowed(
                method,
                &path.pathname,
                matches[index].route_id(),
            )),
            HandlerKind::Loader if !capabilities.has_loader() => Some(RouteError::bad_request(format!(
                "You made a GET request to \"{}\" but did not provide a loader for route \"{}\"",
                path.pathname,
                matches[index].route_id()
            ))),
            _ => None,
        };
        if let Some(error) = missing {
            self.fetchers.finish(&ticket, FetcherSettlement::Error(error));
            return Ok(self.fetchers.get(key));
        }

        let mut should_run = vec![false; matches.len()];
        should_run[index] = true;
        let batch = DataBatch {
            kind,
            matches: matches.clone(),
            should_run,
            request: DataRequest {
                url: path.clone(),
                method,
                form_data: submission.map(|s| s.form_data),
                signal: ticket.signal.clone(),
            },
            tracker: Arc::clone(&self.deferreds),
        };

        match self.strategy.execute(batch).await {
            BatchOutcome::Aborted => {
                tracing::debug!(key = %key, generation = ticket.generation, "Fetcher call aborted");
            }
            BatchOutcome::Redirect { route_id, redirect } => {
                if self.fetchers.finish(&ticket, FetcherSettlement::Redirected) {
                    let from = Location::new(path.clone(), None);
                    let target = self.redirect_target(&matches, &route_id, &from, &redirect);
                    tracing::info!(key = %key, to = %target.to_href(), "Fetcher redirected main navigation");
                    let mode = Mode::Navigate(if redirect.replace {
                        HistoryAction::Replace
                    } else {
                        HistoryAction::Push
                    });
                    self.run(mode, Location::new(target, None), None, kind == HandlerKind::Action)
                        .await?;
                }
            }
            BatchOutcome::Settled(results) => {
                let settlement = match results.into_iter().next() {
                    Some((_, DataResult::Data(value))) => FetcherSettlement::Data(value),
                    Some((_, DataResult::Deferred(deferred))) => FetcherSettlement::Data(deferred.resolve_all().await),
                    Some((_, DataResult::Error(error))) => FetcherSettlement::Error(error),
                    None => FetcherSettlement::Data(Value::Null),
                };
                let succeeded = !matches!(settlement, FetcherSettlement::Error(_));
                let current = self.fetchers.finish(&ticket, settlement);
                if current && succeeded && kind == HandlerKind::Action && self.is_idle() {
                    tracing::debug!(key = %key, "Fetcher submission settled, revalidating");
                    self.revalidate().await?;
                }
            }
        }
        Ok(self.fetchers.get(key))
    }

    pub fn fetcher(&self, key: &str) -> Option<Fetcher> {
        self.fetchers.get(key)
    }

    /// Abort and destroy fetcher `key`.
    pub fn release_fetcher(&self, key: &str) -> bool {
        self.fetchers.release(key)
    }

    /// The view of `route_id` detached: release the fetchers it owned.
    pub fn detach_route(&self, route_id: &RouteId) -> usize {
        self.fetchers.release_owned_by(route_id)
    }

    pub fn subscribe_fetchers(&self, listener: impl Fn(&Fetcher) + Send + Sync + 'static) -> Unsubscribe {
        self.fetchers.subscribe(listener)
    }

    /// Register a snapshot listener.
    pub fn subscribe(&self, listener: impl Fn(&Arc<RouterState>) + Send + Sync + 'static) -> Unsubscribe {
        self.subscribers.subscribe(listener)
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<RouterState> {
        self.state.load_full()
    }

    pub fn routes(&self) -> Arc<RouteTree> {
        self.tree.load_full()
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Href of `to` resolved against the current matches, basename included.
    pub fn create_href(&self, to: &str) -> RouterResult<String> {
        let path = self.resolve_target(&self.state(), to, None, RelativeRouting::Route)?;
        Ok(self.history.create_href(&path))
    }

    /// Append `children` under `parent` (or at the top level). Later
    /// navigations match against the patched tree.
    pub fn patch_routes(&self, parent: Option<&RouteId>, children: Vec<RouteDefinition>) -> RouterResult<()> {
        self.ensure_live()?;
        let _guard = lock(&self.inner);
        let patched = self.tree.load().patch(parent, children)?;
        tracing::info!(parent = ?parent.map(RouteId::as_str), routes = patched.len(), "Route tree patched");
        self.tree.store(Arc::new(patched));
        Ok(())
    }

    /// Record an error raised while rendering `route_id`, bubbling it like a
    /// loader error. A boundary already showing an error passes it upward.
    pub fn report_render_error(&self, route_id: &RouteId, error: RouteError) -> RouterResult<Arc<RouterState>> {
        self.ensure_live()?;
        let snapshot = {
            let _guard = lock(&self.inner);
            let current = self.state.load_full();
            let mut from = current
                .matches
                .iter()
                .position(|m| m.route_id() == route_id)
                .ok_or_else(|| RouterError::UnknownRoute(route_id.clone()))?;
            let mut errors = current.errors.clone().unwrap_or_default();
            let mut fatal_error = current.fatal_error.clone();

            loop {
                let boundary = find_nearest_boundary(&current.matches[..=from], None);
                match boundary {
                    Some(b) if !errors.contains_key(b.route_id()) => {
                        tracing::warn!(route_id = %route_id, boundary = %b.route_id(), error = %error, "Render error");
                        errors.insert(b.route_id().clone(), error);
                        break;
                    }
                    Some(b) => {
                        let depth = current
                            .matches
                            .iter()
                            .position(|m| m.route_id() == b.route_id())
                            .unwrap_or(0);
                        if depth == 0 {
                            fatal_error.get_or_insert(error);
                            break;
                        }
                        from = depth - 1;
                    }
                    None => {
                        tracing::warn!(route_id = %route_id, error = %error, "Render error reached no boundary");
                        fatal_error.get_or_insert(error);
                        break;
                    }
                }
            }

            let mut next = (*current).clone();
            next.errors = if errors.is_empty() { None } else { Some(errors) };
            next.fatal_error = fatal_error;
            let next = Arc::new(next);
            self.state.store(Arc::clone(&next));
            next
        };
        self.subscribers.notify(&snapshot);
        Ok(snapshot)
    }

    /// Abort in-flight work, drop fetchers and deferreds, detach from
    /// history and drop every listener. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            if let Some(pending) = inner.pending.take() {
                pending.controller.abort();
            }
        }
        self.fetchers.clear();
        let cancelled = self.deferreds.cancel_all();
        if let Some(handle) = lock(&self.history_listener).take() {
            handle.unsubscribe();
        }
        self.subscribers.clear();
        tracing::info!(cancelled_deferreds = cancelled, "Router disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> RouterResult<()> {
        if self.is_disposed() {
            return Err(RouterError::Disposed);
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        lock(&self.inner).pending.is_none()
    }

    fn on_history_pop(self: Arc<Self>, update: &HistoryUpdate) {
        let location = update.location.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = self.run(Mode::Navigate(HistoryAction::Pop), location, None, false).await {
                        tracing::warn!(error = %error, "Pop navigation failed");
                    }
                });
            }
            Err(_) => tracing::warn!(to = %location.href(), "History traversal outside a Tokio runtime ignored"),
        }
    }

    fn resolve_target(
        &self,
        current: &RouterState,
        to: &str,
        from_route_id: Option<&RouteId>,
        relative: RelativeRouting,
    ) -> RouterResult<Path> {
        let context = match from_route_id {
            Some(id) => {
                let end = current
                    .matches
                    .iter()
                    .position(|m| m.route_id() == id)
                    .ok_or_else(|| RouterError::UnknownRoute(id.clone()))?;
                &current.matches[..=end]
            }
            None => &current.matches[..],
        };
        let location_pathname =
            strip_basename(&current.location.pathname, &self.basename).unwrap_or(&current.location.pathname);
        let path = resolve_to(to, &resolve_to_pathnames(context), location_pathname, relative);
        Ok(self.with_basename(path))
    }

    fn with_basename(&self, mut path: Path) -> Path {
        if self.basename != "/" {
            path.pathname = if path.pathname == "/" {
                self.basename.clone()
            } else {
                join_paths(&[&self.basename, &path.pathname])
            };
        }
        path
    }

    fn redirect_target(&self, matches: &[RouteMatch], route_id: &RouteId, from: &Location, redirect: &Redirect) -> Path {
        let mut raw = redirect.location.as_str();
        if let Some(scheme_end) = raw.find("://") {
            let rest = &raw[scheme_end + 3..];
            tracing::warn!(location = %redirect.location, "Absolute redirect URL treated as same-origin");
            raw = rest.find('/').map_or("/", |i| &rest[i..]);
        }
        let end = matches
            .iter()
            .position(|m| m.route_id() == route_id)
            .map_or(matches.len(), |i| i + 1);
        let location_pathname = strip_basename(&from.pathname, &self.basename).unwrap_or(&from.pathname);
        let path = resolve_to(
            raw,
            &resolve_to_pathnames(&matches[..end]),
            location_pathname,
            RelativeRouting::Route,
        );
        self.with_basename(path)
    }

    fn begin_generation(&self, mode: Mode, location: &Location) -> RouterResult<(u64, AbortSignal)> {
        let mut inner = lock(&self.inner);
        if self.is_disposed() {
            return Err(RouterError::Disposed);
        }
        inner.generation += 1;
        let generation = inner.generation;
        if let Some(previous) = inner.pending.take() {
            tracing::info!(
                generation = previous.generation,
                superseded_by = generation,
                to = %previous.location.href(),
                "Navigation superseded"
            );
            previous.controller.abort();
            metrics::record_navigation("superseded");
        }
        let controller = AbortController::new();
        let signal = controller.signal();
        inner.pending = Some(PendingNavigation {
            generation,
            controller,
            mode,
            location: location.clone(),
        });
        Ok((generation, signal))
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.inner).generation == generation
    }

    async fn run(
        self: &Arc<Self>,
        mut mode: Mode,
        mut location: Location,
        mut submission: Option<Submission>,
        mut force: bool,
    ) -> RouterResult<NavigationOutcome> {
        let mut redirects = 0u32;
        loop {
            let (generation, signal) = self.begin_generation(mode, &location)?;
            match self
                .attempt(generation, signal, mode, &location, submission.as_ref(), force)
                .await
            {
                Step::Done(outcome) => return Ok(outcome),
                Step::Redirect { target, redirect } => {
                    redirects += 1;
                    if redirects > self.max_redirects {
                        tracing::error!(generation, limit = self.max_redirects, "Redirect limit exceeded");
                        self.abandon(generation);
                        metrics::record_navigation("failed");
                        return Err(RouterError::RedirectLimit(self.max_redirects));
                    }
                    tracing::info!(
                        generation,
                        from = %location.href(),
                        to = %target.to_href(),
                        status = redirect.status,
                        "Redirecting"
                    );
                    metrics::record_navigation("redirected");
                    mode = Mode::Navigate(if redirect.replace {
                        HistoryAction::Replace
                    } else {
                        HistoryAction::Push
                    });
                    force = force || submission.is_some();
                    if !matches!(redirect.status, 307 | 308) {
                        submission = None;
                    }
                    location = Location::new(target, None);
                }
            }
        }
    }

    async fn attempt(
        &self,
        generation: u64,
        signal: AbortSignal,
        mode: Mode,
        location: &Location,
        submission: Option<&Submission>,
        force: bool,
    ) -> Step {
        let tree = self.tree.load_full();
        let current = self.state();
        let is_revalidation = force || mode == Mode::Revalidate;
        tracing::info!(
            generation,
            to = %location.href(),
            method = submission.map(|s| s.method.as_str()).unwrap_or("GET"),
            revalidation = is_revalidation,
            "Navigation started"
        );

        let Some(matches) = match_routes(&tree, &location.pathname, Some(&self.basename)) else {
            tracing::info!(generation, pathname = %location.pathname, "No route matched, committing 404");
            let (matches, placed) = not_found(&tree, &location.pathname, &self.basename);
            let (errors, fatal_error) = placed.into_parts();
            let loader_data = merge_loader_data(
                &current.loader_data,
                BTreeMap::new(),
                &matches,
                errors.as_ref(),
                &HashSet::new(),
            );
            return Step::Done(self.commit(
                generation,
                Commit {
                    mode,
                    location: location.clone(),
                    matches,
                    loader_data,
                    action_data: None,
                    errors,
                    fatal_error,
                    reloaded: HashSet::new(),
                    deferreds: Vec::new(),
                },
            ));
        };

        if submission.is_none() && !is_revalidation && location.is_hash_change_of(&current.location) {
            tracing::debug!(generation, hash = %location.hash, "Hash change, skipping loaders");
            return Step::Done(self.commit(
                generation,
                Commit {
                    mode,
                    location: location.clone(),
                    matches,
                    loader_data: current.loader_data.clone(),
                    action_data: current.action_data.clone(),
                    errors: current.errors.clone(),
                    fatal_error: current.fatal_error.clone(),
                    reloaded: HashSet::new(),
                    deferreds: Vec::new(),
                },
            ));
        }

        let mut placed = PlacedErrors::default();
        let mut action_data = None;
        let mut action_result = None;
        let mut action_status = None;
        let mut action_boundary = None;

        if let Some(sub) = submission {
            self.transition(generation, |s| {
                s.navigation = Navigation::submitting(location.clone(), sub);
            });
            let outcome = match matches.iter().rposition(|m| m.route.capabilities.has_action()) {
                None => {
                    let leaf = matches[matches.len() - 1].route_id().clone();
                    let error = RouteError::method_not_allowed(sub.method, &location.pathname, &leaf);
                    Err((leaf, error))
                }
                Some(index) => {
                    tracing::info!(generation, route_id = %matches[index].route_id(), method = %sub.method, "Submitting");
                    let mut should_run = vec![false; matches.len()];
                    should_run[index] = true;
                    let batch = DataBatch {
                        kind: HandlerKind::Action,
                        matches: matches.clone(),
                        should_run,
                        request: data_request(location, sub.method, Some(sub.form_data.clone()), &signal),
                        tracker: Arc::clone(&self.deferreds),
                    };
                    match self.strategy.execute(batch).await {
                        BatchOutcome::Aborted => return Step::Done(superseded(generation)),
                        BatchOutcome::Redirect { route_id, redirect } => {
                            let target = self.redirect_target(&matches, &route_id, location, &redirect);
                            return Step::Redirect { target, redirect };
                        }
                        BatchOutcome::Settled(results) => match results.into_iter().next() {
                            Some((id, DataResult::Data(value))) => Ok((id, value)),
                            Some((id, DataResult::Error(error))) => Err((id, error)),
                            Some((id, DataResult::Deferred(deferred))) => {
                                deferred.cancel();
                                Err((id, RouteError::bad_request("deferred data is not supported in actions")))
                            }
                            None => Ok((matches[index].route_id().clone(), Value::Null)),
                        },
                    }
                }
            };
            if !self.is_current(generation) {
                return Step::Done(superseded(generation));
            }
            match outcome {
                Ok((id, value)) => {
                    action_status = Some(200);
                    action_result = Some(value.clone());
                    action_data = Some(BTreeMap::from([(id, value)]));
                }
                Err((id, error)) => {
                    tracing::info!(generation, route_id = %id, error = %error, "Action failed");
                    action_status = Some(error.status().unwrap_or(500));
                    action_boundary = Some(
                        find_nearest_boundary(&matches, Some(&id))
                            .unwrap_or(&matches[0])
                            .route_id()
                            .clone(),
                    );
                    placed.place(&matches, &id, error);
                }
            }
        }

        let should_run = matches_to_load(&LoadPlan {
            current: &current,
            next_location: location,
            next_matches: &matches,
            submission,
            action_result: action_result.as_ref(),
            action_status,
            action_error_boundary: action_boundary.as_ref(),
            is_revalidation,
        });

        let mut new_data = BTreeMap::new();
        let mut reloaded = HashSet::new();
        let mut deferreds = Vec::new();
        let loads = should_run.iter().filter(|run| **run).count();
        if loads > 0 {
            self.transition(generation, |s| {
                if mode == Mode::Revalidate {
                    s.revalidation = RevalidationState::Loading;
                } else {
                    s.navigation = Navigation::loading(location.clone(), submission);
                    if force {
                        s.revalidation = RevalidationState::Loading;
                    }
                }
            });
            tracing::info!(generation, loaders = loads, "Loading");
            let batch = DataBatch {
                kind: HandlerKind::Loader,
                matches: matches.clone(),
                should_run,
                request: data_request(location, FormMethod::Get, None, &signal),
                tracker: Arc::clone(&self.deferreds),
            };
            match self.strategy.execute(batch).await {
                BatchOutcome::Aborted => return Step::Done(superseded(generation)),
                BatchOutcome::Redirect { route_id, redirect } => {
                    let target = self.redirect_target(&matches, &route_id, location, &redirect);
                    return Step::Redirect { target, redirect };
                }
                BatchOutcome::Settled(results) => {
                    for (id, result) in results {
                        reloaded.insert(id.clone());
                        match result {
                            DataResult::Data(value) => {
                                new_data.insert(id, RouteData::Ready(value));
                            }
                            DataResult::Deferred(deferred) => {
                                deferreds.push(deferred.clone());
                                new_data.insert(id, RouteData::Deferred(deferred));
                            }
                            DataResult::Error(error) => {
                                tracing::info!(generation, route_id = %id, error = %error, "Loader failed");
                                placed.place(&matches, &id, error);
                            }
                        }
                    }
                }
            }
        }

        let (errors, fatal_error) = placed.into_parts();
        let loader_data = merge_loader_data(&current.loader_data, new_data, &matches, errors.as_ref(), &reloaded);
        let action_data = if submission.is_some() {
            action_data
        } else if is_revalidation {
            current.action_data.clone()
        } else {
            None
        };

        Step::Done(self.commit(
            generation,
            Commit {
                mode,
                location: location.clone(),
                matches,
                loader_data,
                action_data,
                errors,
                fatal_error,
                reloaded,
                deferreds,
            },
        ))
    }

    /// Publish an in-progress transition for `generation`, if still current.
    fn transition(&self, generation: u64, update: impl FnOnce(&mut RouterState)) {
        let snapshot = {
            let inner = lock(&self.inner);
            if inner.generation != generation {
                return;
            }
            let mut next = (*self.state.load_full()).clone();
            update(&mut next);
            let next = Arc::new(next);
            self.state.store(Arc::clone(&next));
            next
        };
        self.subscribers.notify(&snapshot);
    }

    fn commit(&self, generation: u64, commit: Commit) -> NavigationOutcome {
        let snapshot = {
            let mut inner = lock(&self.inner);
            if inner.generation != generation || self.is_disposed() {
                drop(inner);
                for deferred in &commit.deferreds {
                    deferred.cancel();
                }
                return superseded(generation);
            }
            let current = self.state.load_full();
            let (history_action, location) = match commit.mode {
                Mode::Navigate(HistoryAction::Push) => (
                    HistoryAction::Push,
                    self.history.push(commit.location.path(), commit.location.state.clone()),
                ),
                Mode::Navigate(HistoryAction::Replace) => (
                    HistoryAction::Replace,
                    self.history.replace(commit.location.path(), commit.location.state.clone()),
                ),
                Mode::Navigate(HistoryAction::Pop) => (HistoryAction::Pop, commit.location),
                Mode::Revalidate => (current.history_action, current.location.clone()),
            };

            let live: HashSet<RouteId> = commit.matches.iter().map(|m| m.route_id().clone()).collect();
            let cancelled = self
                .deferreds
                .cancel_where(|id| !live.contains(id) || commit.reloaded.contains(id));
            if cancelled > 0 {
                tracing::debug!(generation, cancelled, "Deferred values of left or reloaded routes aborted");
            }
            for deferred in commit.deferreds {
                self.deferreds.activate(deferred);
            }

            let next = Arc::new(RouterState {
                history_action,
                location,
                matches: commit.matches,
                initialized: true,
                navigation: Navigation::idle(),
                revalidation: RevalidationState::Idle,
                loader_data: commit.loader_data,
                action_data: commit.action_data,
                errors: commit.errors,
                fatal_error: commit.fatal_error,
                generation,
            });
            self.state.store(Arc::clone(&next));
            inner.pending = None;
            next
        };

        tracing::info!(
            generation,
            location = %snapshot.location.href(),
            errors = snapshot.errors.as_ref().map_or(0, BTreeMap::len),
            fatal = snapshot.fatal_error.is_some(),
            "Navigation committed"
        );
        metrics::record_navigation("committed");
        self.subscribers.notify(&snapshot);
        NavigationOutcome::Committed(snapshot)
    }

    /// Drop the pending navigation of `generation` and return to idle.
    fn abandon(&self, generation: u64) {
        let snapshot = {
            let mut inner = lock(&self.inner);
            if inner.generation != generation {
                return;
            }
            if let Some(pending) = inner.pending.take() {
                pending.controller.abort();
            }
            let mut next = (*self.state.load_full()).clone();
            next.navigation = Navigation::idle();
            next.revalidation = RevalidationState::Idle;
            let next = Arc::new(next);
            self.state.store(Arc::clone(&next));
            next
        };
        self.subscribers.notify(&snapshot);
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("basename", &self.basename)
            .field("location", &self.state.load().location.href())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn superseded(generation: u64) -> NavigationOutcome {
    tracing::debug!(generation, "Discarding results of superseded navigation");
    NavigationOutcome::Superseded
}

fn data_request(location: &Location, method: FormMethod, form_data: Option<FormData>, signal: &AbortSignal) -> DataRequest {
    DataRequest {
        url: location.path(),
        method,
        form_data,
        signal: signal.clone(),
    }
}

fn normalize_basename(basename: Option<&str>) -> String {
    let trimmed = basename.unwrap_or("/").trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Split a navigation's form payload: GET data moves into the search string,
/// other methods become a submission.
fn apply_submission(mut path: Path, method: Option<FormMethod>, form_data: Option<FormData>) -> (Path, Option<Submission>) {
    match method {
        Some(method) if method.is_mutation() => (
            path,
            Some(Submission {
                method,
                form_data: form_data.unwrap_or_default(),
            }),
        ),
        _ => {
            if let Some(form_data) = form_data {
                path.search = normalize_search(&form_data.to_query_string());
            }
            (path, None)
        }
    }
}

/// Fetcher target: the deepest path-contributing match, or the index leaf
/// when the search carries a bare `index` param.
fn fetcher_target(matches: &[RouteMatch], search: &str) -> Option<usize> {
    let last = matches.len().checked_sub(1)?;
    let wants_index = FormData::from_query_string(search)
        .get_all("index")
        .any(str::is_empty);
    if matches[last].route.index && wants_index {
        return Some(last);
    }
    matches
        .iter()
        .enumerate()
        .filter(|(i, m)| *i == 0 || m.route.path.as_deref().is_some_and(|p| !p.is_empty()))
        .map(|(i, _)| i)
        .last()
}

/// Matches and errors for a URL no branch matches. The error lands on the
/// nearest boundary of the deepest partial chain; matches stop there.
fn not_found(tree: &RouteTree, pathname: &str, basename: &str) -> (Vec<RouteMatch>, PlacedErrors) {
    let partial = match_partial(tree, pathname, Some(basename));
    let error = RouteError::not_found(pathname);
    let mut placed = PlacedErrors::default();
    match partial.last() {
        Some(leaf) => {
            let leaf = leaf.route_id().clone();
            placed.place(&partial, &leaf, error);
        }
        None => placed.fatal = Some(error),
    }
    let keep = placed.shallowest_depth(&partial).map_or(0, |depth| depth + 1);
    let mut matches = partial;
    matches.truncate(keep);
    (matches, placed)
}

/// Fresh data wins; kept routes retain old data; routes that failed to
/// reload lose it. Nothing below the first erroring boundary is kept.
fn merge_loader_data(
    current: &BTreeMap<RouteId, RouteData>,
    mut fresh: BTreeMap<RouteId, RouteData>,
    matches: &[RouteMatch],
    errors: Option<&BTreeMap<RouteId, RouteError>>,
    reloaded: &HashSet<RouteId>,
) -> BTreeMap<RouteId, RouteData> {
    let mut merged = BTreeMap::new();
    for m in matches {
        let id = m.route_id();
        if let Some(data) = fresh.remove(id) {
            merged.insert(id.clone(), data);
        } else if !reloaded.contains(id) && m.route.capabilities.has_loader() {
            if let Some(data) = current.get(id) {
                merged.insert(id.clone(), data.clone());
            }
        }
        if errors.is_some_and(|e| e.contains_key(id)) {
            break;
        }
    }
    merged
}
