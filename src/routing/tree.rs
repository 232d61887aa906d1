//! Route definitions and the immutable route arena.
//!
//! # Responsibilities
//! - Accept a nested `RouteDefinition` tree from the caller
//! - Assign stable ids (explicit, or derived from tree position: `0-2-1`)
//! - Store nodes in an arena keyed by id, linked by parent/child ids
//! - Precompute ranked branches once per tree
//! - Produce patched trees that share untouched nodes
//!
//! # Design Decisions
//! - Nodes are `Arc`ed so matches and snapshots can hold them cheaply
//! - Handler presence is an explicit capability record checked at match time
//! - Configuration errors (index with children, bad absolute paths,
//!   duplicate ids) fail tree construction

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::handler::{HandlerArgs, HandlerOutput, RouteError, RouteHandler, ShouldRevalidate, ShouldRevalidateArgs};
use crate::error::{RouterError, RouterResult};
use crate::routing::flatten::{flatten_routes, rank_branches, Branch};

/// Stable route identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(String);

impl RouteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RouteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which data handlers a route provides.
#[derive(Clone, Default)]
pub struct RouteCapabilities {
    pub loader: Option<Arc<dyn RouteHandler>>,
    pub action: Option<Arc<dyn RouteHandler>>,
    pub should_revalidate: Option<Arc<dyn ShouldRevalidate>>,
}

impl RouteCapabilities {
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl fmt::Debug for RouteCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteCapabilities")
            .field("loader", &self.loader.is_some())
            .field("action", &self.action.is_some())
            .field("should_revalidate", &self.should_revalidate.is_some())
            .finish()
    }
}

/// A node of the declared route tree, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RouteDefinition {
    pub id: Option<String>,
    /// Pattern; `None` makes a pathless layout route.
    pub path: Option<String>,
    pub index: bool,
    pub case_sensitive: bool,
    /// The route renders an error path for failures at or below it.
    pub error_boundary: bool,
    pub capabilities: RouteCapabilities,
    /// Opaque data for the view layer.
    pub handle: Option<Value>,
    pub children: Vec<RouteDefinition>,
}

impl RouteDefinition {
    /// A route matching `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// An index route: renders at its parent's URL.
    pub fn index() -> Self {
        Self {
            index: true,
            ..Self::default()
        }
    }

    /// A pathless layout route.
    pub fn layout() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn error_boundary(mut self, yes: bool) -> Self {
        self.error_boundary = yes;
        self
    }

    pub fn loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput, RouteError>> + Send + 'static,
    {
        self.capabilities.loader = Some(Arc::new(loader));
        self
    }

    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput, RouteError>> + Send + 'static,
    {
        self.capabilities.action = Some(Arc::new(action));
        self
    }

    /// Use a shared handler, e.g. one built around a `FetchClient`.
    pub fn loader_handler(mut self, loader: Arc<dyn RouteHandler>) -> Self {
        self.capabilities.loader = Some(loader);
        self
    }

    pub fn action_handler(mut self, action: Arc<dyn RouteHandler>) -> Self {
        self.capabilities.action = Some(action);
        self
    }

    pub fn should_revalidate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ShouldRevalidateArgs) -> bool + Send + Sync + 'static,
    {
        self.capabilities.should_revalidate = Some(Arc::new(predicate));
        self
    }

    pub fn handle(mut self, handle: Value) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn child(mut self, child: RouteDefinition) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = RouteDefinition>) -> Self {
        self.children.extend(children);
        self
    }
}

/// A route stored in the arena.
#[derive(Debug)]
pub struct RouteNode {
    pub id: RouteId,
    pub path: Option<String>,
    pub index: bool,
    pub case_sensitive: bool,
    pub error_boundary: bool,
    pub capabilities: RouteCapabilities,
    pub handle: Option<Value>,
    pub parent: Option<RouteId>,
    pub children: Vec<RouteId>,
}

/// Immutable arena of routes plus its ranked branches.
#[derive(Debug)]
pub struct RouteTree {
    nodes: HashMap<RouteId, Arc<RouteNode>>,
    roots: Vec<RouteId>,
    branches: Vec<Branch>,
}

impl RouteTree {
    /// Build the arena from nested definitions and rank its branches.
    pub fn new(routes: Vec<RouteDefinition>) -> RouterResult<Self> {
        let mut nodes = HashMap::new();
        let mut roots = Vec::with_capacity(routes.len());
        for (index, def) in routes.into_iter().enumerate() {
            roots.push(insert_definition(&mut nodes, def, None, index.to_string())?);
        }
        Self::assemble(nodes, roots)
    }

    fn assemble(nodes: HashMap<RouteId, Arc<RouteNode>>, roots: Vec<RouteId>) -> RouterResult<Self> {
        let mut tree = Self {
            nodes,
            roots,
            branches: Vec::new(),
        };
        let mut branches = flatten_routes(&tree)?;
        rank_branches(&mut branches);
        tracing::debug!(
            routes = tree.nodes.len(),
            branches = branches.len(),
            "Route tree flattened"
        );
        tree.branches = branches;
        Ok(tree)
    }

    /// Return a new tree with `children` appended under `parent` (or at the
    /// top level when `parent` is `None`). Untouched nodes are shared.
    pub fn patch(&self, parent: Option<&RouteId>, children: Vec<RouteDefinition>) -> RouterResult<Self> {
        let mut nodes = self.nodes.clone();
        let mut roots = self.roots.clone();

        match parent {
            Some(parent_id) => {
                let parent_node = self
                    .nodes
                    .get(parent_id)
                    .ok_or_else(|| RouterError::UnknownRoute(parent_id.clone()))?;
                if parent_node.index && !children.is_empty() {
                    return Err(RouterError::IndexRouteWithChildren {
                        path: parent_node.path.clone().unwrap_or_default(),
                    });
                }
                let mut child_ids = parent_node.children.clone();
                for def in children {
                    let position = format!("{}-{}", parent_id, child_ids.len());
                    child_ids.push(insert_definition(&mut nodes, def, Some(parent_id.clone()), position)?);
                }
                let patched = RouteNode {
                    id: parent_node.id.clone(),
                    path: parent_node.path.clone(),
                    index: parent_node.index,
                    case_sensitive: parent_node.case_sensitive,
                    error_boundary: parent_node.error_boundary,
                    capabilities: parent_node.capabilities.clone(),
                    handle: parent_node.handle.clone(),
                    parent: parent_node.parent.clone(),
                    children: child_ids,
                };
                nodes.insert(parent_id.clone(), Arc::new(patched));
            }
            None => {
                for def in children {
                    let position = roots.len().to_string();
                    roots.push(insert_definition(&mut nodes, def, None, position)?);
                }
            }
        }

        Self::assemble(nodes, roots)
    }

    pub fn get(&self, id: &RouteId) -> Option<&Arc<RouteNode>> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> &[RouteId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ranked branches, highest score first.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Nodes iterated in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<RouteNode>> {
        self.nodes.values()
    }

    /// Return true if `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: &RouteId, id: &RouteId) -> bool {
        let mut current = Some(id.clone());
        while let Some(cur) = current {
            if &cur == ancestor {
                return true;
            }
            current = self.nodes.get(&cur).and_then(|n| n.parent.clone());
        }
        false
    }
}

fn insert_definition(
    nodes: &mut HashMap<RouteId, Arc<RouteNode>>,
    def: RouteDefinition,
    parent: Option<RouteId>,
    position: String,
) -> RouterResult<RouteId> {
    let id = RouteId::new(def.id.unwrap_or(position.clone()));
    if nodes.contains_key(&id) {
        return Err(RouterError::DuplicateRouteId(id));
    }
    if def.index && !def.children.is_empty() {
        return Err(RouterError::IndexRouteWithChildren {
            path: def.path.unwrap_or_default(),
        });
    }

    // Reserve the id before descending so children cannot reuse it.
    let placeholder = Arc::new(RouteNode {
        id: id.clone(),
        path: None,
        index: false,
        case_sensitive: false,
        error_boundary: false,
        capabilities: RouteCapabilities::default(),
        handle: None,
        parent: None,
        children: Vec::new(),
    });
    nodes.insert(id.clone(), placeholder);

    let mut children = Vec::with_capacity(def.children.len());
    for (index, child) in def.children.into_iter().enumerate() {
        let child_position = format!("{position}-{index}");
        children.push(insert_definition(nodes, child, Some(id.clone()), child_position)?);
    }

    nodes.insert(
        id.clone(),
        Arc::new(RouteNode {
            id: id.clone(),
            path: def.path,
            index: def.index,
            case_sensitive: def.case_sensitive,
            error_boundary: def.error_boundary,
            capabilities: def.capabilities,
            handle: def.handle,
            parent,
            children,
        }),
    );
    Ok(id)
}
