//! Error-boundary bubbling.
//!
//! A failure recorded against a route travels up the match chain until it
//! reaches a route marked as an error boundary. With no such route it becomes
//! the router's fatal error. When several failures land on one boundary, the
//! shallowest failing route wins.

use std::collections::BTreeMap;

use crate::data::handler::RouteError;
use crate::routing::{RouteId, RouteMatch};

/// Nearest boundary at or above `route_id` in `matches`. With `route_id`
/// absent (or not in `matches`), search from the leaf.
pub fn find_nearest_boundary<'a>(matches: &'a [RouteMatch], route_id: Option<&RouteId>) -> Option<&'a RouteMatch> {
    let end = route_id
        .and_then(|id| matches.iter().position(|m| m.route_id() == id))
        .map_or(matches.len(), |i| i + 1);
    matches[..end].iter().rev().find(|m| m.route.error_boundary)
}

/// Errors grouped at their boundaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacedErrors {
    pub errors: BTreeMap<RouteId, RouteError>,
    pub fatal: Option<RouteError>,
}

impl PlacedErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.fatal.is_none()
    }

    /// Place one error thrown at `route_id`. An error already sitting on the
    /// same boundary is kept.
    pub fn place(&mut self, matches: &[RouteMatch], route_id: &RouteId, error: RouteError) {
        match find_nearest_boundary(matches, Some(route_id)) {
            Some(boundary) => {
                tracing::debug!(route_id = %route_id, boundary = %boundary.route_id(), "Error bubbled to boundary");
                self.errors.entry(boundary.route_id().clone()).or_insert(error);
            }
            None => {
                tracing::warn!(route_id = %route_id, error = %error, "Error reached no boundary");
                self.fatal.get_or_insert(error);
            }
        }
    }

    /// Depth of the shallowest boundary holding an error.
    pub fn shallowest_depth(&self, matches: &[RouteMatch]) -> Option<usize> {
        matches.iter().position(|m| self.errors.contains_key(m.route_id()))
    }

    pub fn into_parts(self) -> (Option<BTreeMap<RouteId, RouteError>>, Option<RouteError>) {
        let errors = if self.errors.is_empty() { None } else { Some(self.errors) };
        (errors, self.fatal)
    }
}
