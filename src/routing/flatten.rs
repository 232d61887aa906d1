//! Route tree flattening and specificity ranking.
//!
//! # Responsibilities
//! - Walk the arena and emit one branch per routable node (root-to-node chain)
//! - Resolve absolute child paths against their parents
//! - Score each branch and sort branches by score
//!
//! # Scoring
//! ```text
//! base            = number of '/'-separated segments in the branch path
//! static segment  = +10
//! :param          = +3
//! :param? / lit?  = +2
//! *               = +1
//! empty segment   = +1
//! index route     = +2
//! ```
//! Ties between siblings go to the earlier declaration; all other ties keep
//! flattening order (stable sort).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RouterError, RouterResult};
use crate::routing::pattern::{CompiledPattern, PathPattern};
use crate::routing::tree::{RouteId, RouteNode, RouteTree};

const STATIC_SEGMENT_VALUE: u32 = 10;
const DYNAMIC_SEGMENT_VALUE: u32 = 3;
const OPTIONAL_SEGMENT_VALUE: u32 = 2;
const SPLAT_SEGMENT_VALUE: u32 = 1;
const EMPTY_SEGMENT_VALUE: u32 = 1;
const INDEX_ROUTE_VALUE: u32 = 2;

/// One route's contribution to a branch.
#[derive(Debug, Clone)]
pub struct RouteMeta {
    /// Path relative to the parent's accumulated path.
    pub relative_path: String,
    pub case_sensitive: bool,
    /// Position among the parent's children.
    pub children_index: usize,
    pub route: Arc<RouteNode>,
    /// Matcher that leaves a remainder (used for ancestors).
    pub(crate) prefix: Arc<CompiledPattern>,
    /// Matcher that must consume the whole remainder (used for the leaf).
    pub(crate) exact: Arc<CompiledPattern>,
}

/// A root-to-node chain with its score.
#[derive(Debug, Clone)]
pub struct Branch {
    /// Full joined pattern of the chain.
    pub path: String,
    pub score: u32,
    pub routes_meta: Vec<RouteMeta>,
}

impl Branch {
    /// The route at the end of the chain.
    pub fn leaf(&self) -> Option<&Arc<RouteNode>> {
        self.routes_meta.last().map(|m| &m.route)
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &RouteId> {
        self.routes_meta.iter().map(|m| &m.route.id)
    }
}

type PatternKey = (String, bool, bool);

struct Flattener<'a> {
    tree: &'a RouteTree,
    compiled: HashMap<PatternKey, Arc<CompiledPattern>>,
    branches: Vec<Branch>,
}

impl Flattener<'_> {
    fn compile(&mut self, path: &str, case_sensitive: bool, end: bool) -> RouterResult<Arc<CompiledPattern>> {
        let key = (path.to_string(), case_sensitive, end);
        if let Some(found) = self.compiled.get(&key) {
            return Ok(found.clone());
        }
        let pattern = PathPattern::new(path).case_sensitive(case_sensitive).end(end);
        let compiled = Arc::new(CompiledPattern::compile(&pattern)?);
        self.compiled.insert(key, compiled.clone());
        Ok(compiled)
    }

    fn walk(&mut self, ids: &[RouteId], parents: &[RouteMeta], parent_path: &str) -> RouterResult<()> {
        for (children_index, id) in ids.iter().enumerate() {
            let route = self
                .tree
                .get(id)
                .cloned()
                .ok_or_else(|| RouterError::UnknownRoute(id.clone()))?;

            let mut relative_path = route.path.clone().unwrap_or_default();
            if relative_path.starts_with('/') {
                if !extends_path(&relative_path, parent_path) {
                    return Err(RouterError::AbsolutePathOutsideParent {
                        path: relative_path,
                        parent: parent_path.to_string(),
                    });
                }
                relative_path = relative_path[parent_path.trim_end_matches('/').len()..].to_string();
            }
            let path = join_paths(&[parent_path, &relative_path]);

            let meta = RouteMeta {
                prefix: self.compile(&relative_path, route.case_sensitive, false)?,
                exact: self.compile(&relative_path, route.case_sensitive, true)?,
                relative_path,
                case_sensitive: route.case_sensitive,
                children_index,
                route: route.clone(),
            };
            let mut metas = parents.to_vec();
            metas.push(meta);

            if !route.children.is_empty() {
                self.walk(&route.children, &metas, &path)?;
            }

            // Pathless layouts only match through their children.
            if route.path.is_none() && !route.index {
                continue;
            }
            let score = compute_score(&path, route.index);
            self.branches.push(Branch {
                path,
                score,
                routes_meta: metas,
            });
        }
        Ok(())
    }
}

/// Flatten `tree` into branches in declaration order (children before their parent).
pub fn flatten_routes(tree: &RouteTree) -> RouterResult<Vec<Branch>> {
    let mut flattener = Flattener {
        tree,
        compiled: HashMap::new(),
        branches: Vec::new(),
    };
    flattener.walk(tree.roots(), &[], "")?;
    Ok(flattener.branches)
}

/// Sort branches by descending score, keeping declaration order on ties.
pub fn rank_branches(branches: &mut [Branch]) {
    branches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| compare_indexes(a, b)));
}

fn compare_indexes(a: &Branch, b: &Branch) -> std::cmp::Ordering {
    let a_idx: Vec<usize> = a.routes_meta.iter().map(|m| m.children_index).collect();
    let b_idx: Vec<usize> = b.routes_meta.iter().map(|m| m.children_index).collect();
    let siblings = !a_idx.is_empty()
        && a_idx.len() == b_idx.len()
        && a_idx[..a_idx.len() - 1] == b_idx[..b_idx.len() - 1];
    if siblings {
        a_idx[a_idx.len() - 1].cmp(&b_idx[b_idx.len() - 1])
    } else {
        std::cmp::Ordering::Equal
    }
}

/// Score a joined branch path.
pub fn compute_score(path: &str, index: bool) -> u32 {
    let segments: Vec<&str> = path.split('/').collect();
    let mut score = segments.len() as u32;
    if index {
        score += INDEX_ROUTE_VALUE;
    }
    for segment in segments {
        score += if segment == "*" {
            SPLAT_SEGMENT_VALUE
        } else if is_optional(segment) {
            OPTIONAL_SEGMENT_VALUE
        } else if is_param(segment) {
            DYNAMIC_SEGMENT_VALUE
        } else if segment.is_empty() {
            EMPTY_SEGMENT_VALUE
        } else {
            STATIC_SEGMENT_VALUE
        };
    }
    score
}

fn is_param(segment: &str) -> bool {
    segment
        .strip_prefix(':')
        .is_some_and(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

fn is_optional(segment: &str) -> bool {
    match segment.strip_suffix('?') {
        Some(rest) => !rest.is_empty() && (is_param(rest) || !rest.starts_with(':')),
        None => false,
    }
}

/// Join path pieces with `/`, collapsing repeated slashes.
pub fn join_paths(paths: &[&str]) -> String {
    let joined = paths.join("/");
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Return true if `path` is `parent` or lies below it on a segment boundary.
pub fn extends_path(path: &str, parent: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    match path.strip_prefix(parent) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Strip trailing slashes and force a single leading slash.
pub fn normalize_pathname(pathname: &str) -> String {
    format!("/{}", pathname.trim_end_matches('/').trim_start_matches('/'))
}
