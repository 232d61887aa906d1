//! Route matching against a ranked route tree.
//!
//! # Responsibilities
//! - Strip the basename (case-insensitive, hard boundary)
//! - Walk ranked branches and return the first that matches the whole pathname
//! - Accumulate params root-to-leaf; deeper routes overwrite repeated names
//! - Find the deepest partially matching chain for not-found handling
//!
//! # Design Decisions
//! - `None` means "not found"; an empty route list never yields `Some(vec![])`
//! - Branches are already sorted, so the first matching branch is the winner
//! - The pathname is decoded once per call, never per branch

use std::sync::Arc;

use serde::Serialize;

use crate::routing::flatten::{join_paths, normalize_pathname, Branch};
use crate::routing::params::Params;
use crate::routing::pattern::decode_path;
use crate::routing::tree::{RouteId, RouteNode, RouteTree};

/// One route's entry in a match result.
#[derive(Debug, Clone, Serialize)]
pub struct RouteMatch {
    #[serde(rename = "id", serialize_with = "serialize_route_id")]
    pub route: Arc<RouteNode>,
    /// Params visible at this depth (ancestors' plus this route's).
    pub params: Params,
    /// Pathname matched up to and including this route.
    pub pathname: String,
    /// Matched pathname without any splat tail.
    pub pathname_base: String,
}

impl RouteMatch {
    pub fn route_id(&self) -> &RouteId {
        &self.route.id
    }
}

impl PartialEq for RouteMatch {
    fn eq(&self, other: &Self) -> bool {
        self.route.id == other.route.id
            && self.params == other.params
            && self.pathname == other.pathname
            && self.pathname_base == other.pathname_base
    }
}

fn serialize_route_id<S: serde::Serializer>(route: &Arc<RouteNode>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(route.id.as_str())
}

/// Remove `basename` from the front of `pathname`.
///
/// Returns `None` when the pathname lies outside the basename.
pub fn strip_basename<'a>(pathname: &'a str, basename: &str) -> Option<&'a str> {
    if basename.is_empty() || basename == "/" {
        return Some(pathname);
    }
    let prefix = pathname.get(..basename.len())?;
    if !prefix.eq_ignore_ascii_case(basename) {
        return None;
    }
    let start = if basename.ends_with('/') {
        basename.len() - 1
    } else {
        basename.len()
    };
    let rest = &pathname[start..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(if rest.is_empty() { "/" } else { rest })
}

/// Keep only the pathname part of `location` (drop `?search` and `#hash`).
fn pathname_only(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    &location[..end]
}

/// Match `location` against `tree`, honouring `basename`.
pub fn match_routes(tree: &RouteTree, location: &str, basename: Option<&str>) -> Option<Vec<RouteMatch>> {
    let pathname = strip_basename(pathname_only(location), basename.unwrap_or("/"))?;
    let decoded = decode_path(pathname);
    let found = tree
        .branches()
        .iter()
        .find_map(|branch| match_branch(branch, &decoded));
    if found.is_none() {
        tracing::debug!(pathname = %pathname, "No route matched");
    }
    found
}

fn remaining<'a>(pathname: &'a str, matched: &str) -> &'a str {
    if matched == "/" {
        return pathname;
    }
    match pathname.get(matched.len()..) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}

fn match_branch(branch: &Branch, pathname: &str) -> Option<Vec<RouteMatch>> {
    let mut params = Params::new();
    let mut matched_pathname = String::from("/");
    let mut matches = Vec::with_capacity(branch.routes_meta.len());
    let last = branch.routes_meta.len().checked_sub(1)?;

    for (i, meta) in branch.routes_meta.iter().enumerate() {
        let rest = remaining(pathname, &matched_pathname);
        let matcher = if i == last { &meta.exact } else { &meta.prefix };
        let m = matcher.match_decoded(rest)?;

        params.extend(&m.params);
        matches.push(RouteMatch {
            route: meta.route.clone(),
            params: params.clone(),
            pathname: join_paths(&[&matched_pathname, &m.pathname]),
            pathname_base: normalize_pathname(&join_paths(&[&matched_pathname, &m.pathname_base])),
        });
        if m.pathname_base != "/" {
            matched_pathname = join_paths(&[&matched_pathname, &m.pathname_base]);
        }
    }
    Some(matches)
}

/// The longest chain of routes whose patterns match a prefix of `location`.
///
/// Used to place a not-found error: index routes never take part, and the
/// first branch in rank order wins among chains of equal depth.
pub fn match_partial(tree: &RouteTree, location: &str, basename: Option<&str>) -> Vec<RouteMatch> {
    let Some(pathname) = strip_basename(pathname_only(location), basename.unwrap_or("/")) else {
        return Vec::new();
    };
    let decoded = decode_path(pathname);
    let mut best: Vec<RouteMatch> = Vec::new();

    for branch in tree.branches() {
        let mut params = Params::new();
        let mut matched_pathname = String::from("/");
        let mut chain = Vec::new();
        for meta in &branch.routes_meta {
            if meta.route.index {
                break;
            }
            let rest = remaining(&decoded, &matched_pathname);
            let Some(m) = meta.prefix.match_decoded(rest) else {
                break;
            };
            params.extend(&m.params);
            chain.push(RouteMatch {
                route: meta.route.clone(),
                params: params.clone(),
                pathname: join_paths(&[&matched_pathname, &m.pathname]),
                pathname_base: normalize_pathname(&join_paths(&[&matched_pathname, &m.pathname_base])),
            });
            if m.pathname_base != "/" {
                matched_pathname = join_paths(&[&matched_pathname, &m.pathname_base]);
            }
        }
        if chain.len() > best.len() {
            best = chain;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::tree::RouteDefinition;

    fn leaf_id(matches: &[RouteMatch]) -> &str {
        matches.last().unwrap().route.id.as_str()
    }

    fn groups_tree() -> RouteTree {
        let paths = [
            "/groups/main/users/me",
            "/groups/:g/users/me",
            "/groups/:g/users/:u",
            "/groups/:g/users/*",
            "/groups/main",
            "/groups/:g",
            "/groups",
            "*",
        ];
        RouteTree::new(paths.iter().map(|p| RouteDefinition::new(*p).id(*p)).collect()).unwrap()
    }

    #[test]
    fn test_ranking_table() {
        let tree = groups_tree();
        let pick = |path: &str| leaf_id(&match_routes(&tree, path, None).unwrap()).to_string();

        assert_eq!(pick("/groups/main/users/me"), "/groups/main/users/me");
        assert_eq!(pick("/groups/x/users/me"), "/groups/:g/users/me");
        assert_eq!(pick("/groups/x/users/y"), "/groups/:g/users/:u");
        assert_eq!(pick("/groups/x/users/y/z"), "/groups/:g/users/*");
        assert_eq!(pick("/groups/main"), "/groups/main");
        assert_eq!(pick("/groups/x"), "/groups/:g");
        assert_eq!(pick("/groups"), "/groups");
        assert_eq!(pick("/anything/else"), "*");
    }

    #[test]
    fn test_index_loses_to_static_sibling() {
        let tree = RouteTree::new(vec![
            RouteDefinition::new(":page").id("dynamic").child(RouteDefinition::index().id("dynamic-index")),
            RouteDefinition::new("page").id("static"),
        ])
        .unwrap();
        let matches = match_routes(&tree, "/page", None).unwrap();
        assert_eq!(leaf_id(&matches), "static");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_index_beats_layout_at_same_url() {
        let tree = RouteTree::new(vec![RouteDefinition::new("/")
            .id("root")
            .child(RouteDefinition::index().id("home"))])
        .unwrap();
        let matches = match_routes(&tree, "/", None).unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.route.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "home"]);
    }

    #[test]
    fn test_nested_params_and_pathnames() {
        let tree = RouteTree::new(vec![RouteDefinition::new("users/:userId")
            .id("user")
            .child(RouteDefinition::new("posts/:postId").id("post"))])
        .unwrap();
        let matches = match_routes(&tree, "/users/u1/posts/p9?tab=x", None).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].pathname, "/users/u1");
        assert_eq!(matches[0].params.get("postId"), None);
        assert_eq!(matches[1].pathname, "/users/u1/posts/p9");
        assert_eq!(matches[1].params.get("userId"), Some("u1"));
        assert_eq!(matches[1].params.get("postId"), Some("p9"));
    }

    #[test]
    fn test_repeated_splat_is_overwritten_by_deeper_route() {
        let tree = RouteTree::new(vec![RouteDefinition::new("docs/*")
            .id("docs")
            .child(RouteDefinition::new("api/*").id("api"))])
        .unwrap();
        let matches = match_routes(&tree, "/docs/api/router", None).unwrap();
        assert_eq!(leaf_id(&matches), "api");
        assert_eq!(matches[0].params.splat(), Some("api/router"));
        assert_eq!(matches[1].params.splat(), Some("router"));
    }

    #[test]
    fn test_basename() {
        let tree = RouteTree::new(vec![RouteDefinition::new("users/:userId")]).unwrap();
        let matches = match_routes(&tree, "/app/users/michael", Some("/app")).unwrap();
        assert_eq!(matches[0].params.get("userId"), Some("michael"));

        assert!(match_routes(&tree, "/APP/users/michael", Some("/app")).is_some());
        assert!(match_routes(&tree, "/other/users/michael", Some("/app")).is_none());
        assert!(match_routes(&tree, "/application/users/michael", Some("/app")).is_none());
    }

    #[test]
    fn test_not_found_is_none() {
        let tree = RouteTree::new(vec![RouteDefinition::new("users")]).unwrap();
        assert!(match_routes(&tree, "/teams", None).is_none());
        let empty = RouteTree::new(Vec::new()).unwrap();
        assert!(match_routes(&empty, "/", None).is_none());
    }

    #[test]
    fn test_partial_match_finds_deepest_chain() {
        let tree = RouteTree::new(vec![RouteDefinition::new("/")
            .id("root")
            .child(RouteDefinition::index().id("home"))
            .child(RouteDefinition::new("users").id("users").child(RouteDefinition::new(":id").id("user")))])
        .unwrap();
        let chain = match_partial(&tree, "/users/5/bogus", None);
        let ids: Vec<_> = chain.iter().map(|m| m.route.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "users", "user"]);

        let chain = match_partial(&tree, "/nope", None);
        let ids: Vec<_> = chain.iter().map(|m| m.route.id.as_str()).collect();
        assert_eq!(ids, vec!["root"]);
    }
}
