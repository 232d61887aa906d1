//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the route manifest for shapes the tree builder rejects
//! - Check the basename and redirect limit
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{RouteConfig, RouterConfig};
use crate::routing::flatten::{extends_path, join_paths};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("basename \"{0}\" must start with '/'")]
    Basename(String),

    #[error("max_redirects must be greater than 0")]
    MaxRedirects,

    #[error("index route {0} must not have children")]
    IndexWithChildren(String),

    #[error("index route {0} must not have a path")]
    IndexWithPath(String),

    #[error("duplicate route id \"{0}\"")]
    DuplicateId(String),

    #[error("route {0}: splat '*' must be the last segment")]
    SplatNotLast(String),

    #[error("route {path}: absolute path does not extend parent path \"{parent}\"")]
    AbsoluteOutsideParent { path: String, parent: String },
}

/// Validate a loaded configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.basename.starts_with('/') {
        errors.push(ValidationError::Basename(config.basename.clone()));
    }
    if config.max_redirects == 0 {
        errors.push(ValidationError::MaxRedirects);
    }

    let mut ids = HashSet::new();
    for route in &config.routes {
        validate_route(route, "/", &mut ids, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(route: &RouteConfig, parent_path: &str, ids: &mut HashSet<String>, errors: &mut Vec<ValidationError>) {
    let label = describe(route);

    if let Some(id) = &route.id {
        if !ids.insert(id.clone()) {
            errors.push(ValidationError::DuplicateId(id.clone()));
        }
    }

    if route.index {
        if !route.children.is_empty() {
            errors.push(ValidationError::IndexWithChildren(label.clone()));
        }
        if route.path.as_deref().is_some_and(|p| !p.is_empty()) {
            errors.push(ValidationError::IndexWithPath(label.clone()));
        }
    }

    let path = route.path.as_deref().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().rev().skip(1).any(|s| *s == "*") {
        errors.push(ValidationError::SplatNotLast(label.clone()));
    }

    let full_path = if path.starts_with('/') {
        if !extends_path(path, parent_path) {
            errors.push(ValidationError::AbsoluteOutsideParent {
                path: path.to_string(),
                parent: parent_path.to_string(),
            });
        }
        path.to_string()
    } else if path.is_empty() {
        parent_path.to_string()
    } else {
        join_paths(&[parent_path, path])
    };

    for child in &route.children {
        validate_route(child, &full_path, ids, errors);
    }
}

fn describe(route: &RouteConfig) -> String {
    match (&route.id, &route.path) {
        (Some(id), _) => format!("\"{id}\""),
        (None, Some(path)) => format!("with path \"{path}\""),
        (None, None) if route.index => "(index)".to_string(),
        (None, None) => "(layout)".to_string(),
    }
}
