//! Relative path resolution.
//!
//! # Responsibilities
//! - Resolve `.`, `..` and bare segments against the current matches
//! - Support both route-relative and URL-relative resolution
//!
//! # Design Decisions
//! - Route-relative `..` pops one path-contributing route, not one segment
//! - The deepest match resolves against its full matched pathname, so a
//!   splat route's `.` keeps the consumed tail
//! - URL-relative resolution works from the raw location pathname

use crate::navigation::location::{normalize_hash, normalize_search, parse_path, PartialPath, Path};
use crate::routing::matcher::RouteMatch;

/// How `..` in a relative target is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelativeRouting {
    /// Pop one matched route level.
    #[default]
    Route,
    /// Pop one URL segment.
    Path,
}

/// Pathnames that relative targets resolve against, shallowest first.
///
/// Only routes that contribute to the path (the root, or routes with a
/// non-empty `path`) are included.
pub fn resolve_to_pathnames(matches: &[RouteMatch]) -> Vec<String> {
    let contributing: Vec<&RouteMatch> = matches
        .iter()
        .enumerate()
        .filter(|(i, m)| *i == 0 || m.route.path.as_deref().is_some_and(|p| !p.is_empty()))
        .map(|(_, m)| m)
        .collect();
    let last = contributing.len().saturating_sub(1);
    contributing
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if i == last {
                m.pathname.clone()
            } else {
                m.pathname_base.clone()
            }
        })
        .collect()
}

/// Resolve `to` against the given route pathnames and current location.
pub fn resolve_to(to: &str, route_pathnames: &[String], location_pathname: &str, relative: RelativeRouting) -> Path {
    let mut target = parse_path(to);
    let is_empty_path = to.is_empty() || target.pathname.as_deref() == Some("");
    let to_pathname = if is_empty_path {
        Some("/".to_string())
    } else {
        target.pathname.clone()
    };

    let from = match (&to_pathname, relative) {
        (None, _) => location_pathname.to_string(),
        (Some(_), RelativeRouting::Path) => location_pathname.to_string(),
        (Some(pathname), RelativeRouting::Route) => {
            let mut index = route_pathnames.len() as isize - 1;
            if !is_empty_path && pathname.starts_with("..") {
                let segments: Vec<&str> = pathname.split('/').collect();
                let popped = segments.iter().take_while(|s| **s == "..").count();
                index -= popped as isize;
                target.pathname = Some(segments[popped..].join("/"));
            }
            if index >= 0 {
                route_pathnames[index as usize].clone()
            } else {
                "/".to_string()
            }
        }
    };

    let mut path = resolve_partial(&target, &from);
    let explicit_trailing_slash = to_pathname
        .as_deref()
        .is_some_and(|p| p != "/" && p.ends_with('/'));
    let current_trailing_slash =
        (is_empty_path || to_pathname.as_deref() == Some(".")) && location_pathname.ends_with('/');
    if !path.pathname.ends_with('/') && (explicit_trailing_slash || current_trailing_slash) {
        path.pathname.push('/');
    }
    path
}

/// Resolve a raw path string against `from_pathname`, one URL segment per `..`.
pub fn resolve_path(to: &str, from_pathname: &str) -> Path {
    resolve_partial(&parse_path(to), from_pathname)
}

fn resolve_partial(to: &PartialPath, from_pathname: &str) -> Path {
    let pathname = match to.pathname.as_deref() {
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) if !p.is_empty() => resolve_pathname(p, from_pathname),
        _ => from_pathname.to_string(),
    };
    Path {
        pathname,
        search: normalize_search(to.search.as_deref().unwrap_or("")),
        hash: normalize_hash(to.hash.as_deref().unwrap_or("")),
    }
}

fn resolve_pathname(relative: &str, from: &str) -> String {
    let mut segments: Vec<&str> = from.trim_end_matches('/').split('/').collect();
    for segment in relative.split('/') {
        match segment {
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            "." => {}
            s => segments.push(s),
        }
    }
    if segments.len() > 1 {
        segments.join("/")
    } else {
        "/".to_string()
    }
}
