//! Router state snapshots.
//!
//! # Responsibilities
//! - Define the immutable snapshot published to subscribers
//! - Answer view-layer questions about a snapshot (which matches render,
//!   which data a route may read)
//! - Define hydration input
//!
//! # Design Decisions
//! - Snapshots are replaced wholesale, never mutated after publication
//! - Deferred loader data is kept as a handle; serialization writes only
//!   its critical part

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::data::deferred::TrackedDeferred;
use crate::data::handler::RouteError;
use crate::data::submission::{FormData, FormMethod, Submission};
use crate::error::{RouterError, RouterResult};
use crate::navigation::history::HistoryAction;
use crate::navigation::location::Location;
use crate::routing::{RouteId, RouteMatch};

/// Phase of the in-flight navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationStatus {
    #[default]
    Idle,
    Loading,
    Submitting,
}

/// The in-flight navigation descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Navigation {
    pub state: NavigationStatus,
    pub location: Option<Location>,
    pub form_method: Option<FormMethod>,
    pub form_data: Option<FormData>,
}

impl Navigation {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn loading(location: Location, submission: Option<&Submission>) -> Self {
        Self {
            state: NavigationStatus::Loading,
            location: Some(location),
            form_method: submission.map(|s| s.method),
            form_data: submission.map(|s| s.form_data.clone()),
        }
    }

    pub fn submitting(location: Location, submission: &Submission) -> Self {
        Self {
            state: NavigationStatus::Submitting,
            location: Some(location),
            form_method: Some(submission.method),
            form_data: Some(submission.form_data.clone()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == NavigationStatus::Idle
    }
}

/// Whether a revalidation without location change is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevalidationState {
    #[default]
    Idle,
    Loading,
}

/// Loader data of one route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteData {
    Ready(Value),
    /// Critical data plus values still resolving.
    Deferred(TrackedDeferred),
}

impl RouteData {
    /// The data available now: the value itself, or the critical part.
    pub fn value(&self) -> &Value {
        match self {
            RouteData::Ready(value) => value,
            RouteData::Deferred(deferred) => deferred.critical(),
        }
    }

    pub fn as_deferred(&self) -> Option<&TrackedDeferred> {
        match self {
            RouteData::Deferred(deferred) => Some(deferred),
            RouteData::Ready(_) => None,
        }
    }
}

impl Serialize for RouteData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// Snapshot published to subscribers after every transition.
#[derive(Debug, Clone, Serialize)]
pub struct RouterState {
    pub history_action: HistoryAction,
    pub location: Location,
    pub matches: Vec<RouteMatch>,
    /// False until the first loader phase (or complete hydration) commits.
    pub initialized: bool,
    pub navigation: Navigation,
    pub revalidation: RevalidationState,
    pub loader_data: BTreeMap<RouteId, RouteData>,
    pub action_data: Option<BTreeMap<RouteId, Value>>,
    /// Errors keyed by the boundary route that displays them.
    pub errors: Option<BTreeMap<RouteId, RouteError>>,
    /// An error no route boundary accepted.
    pub fatal_error: Option<RouteError>,
    /// Generation of the operation that produced this snapshot.
    pub generation: u64,
}

impl RouterState {
    pub fn is_idle(&self) -> bool {
        self.navigation.is_idle() && self.revalidation == RevalidationState::Idle
    }

    pub fn error(&self, route_id: &RouteId) -> Option<&RouteError> {
        self.errors.as_ref().and_then(|errors| errors.get(route_id))
    }

    pub fn loader_data(&self, route_id: &RouteId) -> Option<&RouteData> {
        self.loader_data.get(route_id)
    }

    pub fn action_data(&self, route_id: &RouteId) -> Option<&Value> {
        self.action_data.as_ref().and_then(|data| data.get(route_id))
    }

    /// Matches the view layer renders: everything up to and including the
    /// first route displaying an error. Descendants of that route are cut.
    pub fn rendered_matches(&self) -> &[RouteMatch] {
        let cut = self
            .matches
            .iter()
            .position(|m| self.error(m.route_id()).is_some())
            .map_or(self.matches.len(), |i| i + 1);
        &self.matches[..cut]
    }

    /// Loader data of `target` as read by the view of `reader`.
    ///
    /// A route displaying an error may not read its own data or an
    /// ancestor's: that data belongs to the failed render.
    pub fn route_loader_data(&self, reader: &RouteId, target: &RouteId) -> RouterResult<Option<&RouteData>> {
        if self.error(reader).is_some() {
            let reader_depth = self.matches.iter().position(|m| m.route_id() == reader);
            let target_depth = self.matches.iter().position(|m| m.route_id() == target);
            if let (Some(r), Some(t)) = (reader_depth, target_depth) {
                if t <= r {
                    tracing::warn!(reader = %reader, target = %target, "Loader data read while rendering an error");
                    return Err(RouterError::DataReadDuringError {
                        reader: reader.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(self.loader_data.get(target))
    }
}

/// Data handed over from a server render or a previous session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationData {
    pub loader_data: BTreeMap<RouteId, Value>,
    pub action_data: Option<BTreeMap<RouteId, Value>>,
    pub errors: Option<BTreeMap<RouteId, RouteError>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{match_routes, RouteDefinition, RouteTree};
    use serde_json::json;

    fn state_with_error() -> RouterState {
        let tree = RouteTree::new(vec![RouteDefinition::new("/")
            .id("root")
            .child(RouteDefinition::new("a").id("a").child(RouteDefinition::new("b").id("b")))])
        .unwrap();
        let matches = match_routes(&tree, "/a/b", None).unwrap();
        let mut loader_data = BTreeMap::new();
        loader_data.insert(RouteId::from("root"), RouteData::Ready(json!("r")));
        loader_data.insert(RouteId::from("a"), RouteData::Ready(json!("a")));
        let mut errors = BTreeMap::new();
        errors.insert(RouteId::from("a"), RouteError::thrown("b failed"));
        RouterState {
            history_action: HistoryAction::Pop,
            location: Location::initial("/a/b"),
            matches,
            initialized: true,
            navigation: Navigation::idle(),
            revalidation: RevalidationState::Idle,
            loader_data,
            action_data: None,
            errors: Some(errors),
            fatal_error: None,
            generation: 1,
        }
    }

    #[test]
    fn test_rendered_matches_stop_at_error() {
        let state = state_with_error();
        let ids: Vec<&str> = state.rendered_matches().iter().map(|m| m.route_id().as_str()).collect();
        assert_eq!(ids, vec!["root", "a"]);
    }

    #[test]
    fn test_error_view_cannot_read_own_or_ancestor_data() {
        let state = state_with_error();
        assert!(matches!(
            state.route_loader_data(&"a".into(), &"a".into()),
            Err(RouterError::DataReadDuringError { .. })
        ));
        assert!(state.route_loader_data(&"a".into(), &"root".into()).is_err());
        assert_eq!(
            state.route_loader_data(&"root".into(), &"root".into()).unwrap().map(RouteData::value),
            Some(&json!("r"))
        );
    }

    #[test]
    fn test_serializes_view_shape() {
        let state = state_with_error();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["loader_data"]["a"], json!("a"));
        assert_eq!(value["navigation"]["state"], json!("idle"));
        assert_eq!(value["matches"][2]["id"], json!("b"));
    }
}
