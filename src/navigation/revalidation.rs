//! Which matched routes must run their loader.
//!
//! # Responsibilities
//! - Decide, per match of the next location, whether its loader runs
//!
//! # Design Decisions
//! - Pure function of the current snapshot and the next matches; no I/O
//! - Decision order, first hit wins:
//!   1. routes past the action-error boundary never load
//!   2. routes without a loader never load
//!   3. on first hydration, load only routes missing data
//!   4. a route new to the chain, or missing data, always loads
//!   5. a changed matched pathname or params always loads
//!   6. otherwise the default policy applies, and `shouldRevalidate` may
//!      override it either way
//! - Default policy: reload after a submission or explicit revalidation, on
//!   a same-URL navigation and on a search change; skip otherwise. An action
//!   error with status >= 400 turns the default off.

use serde_json::Value;

use crate::data::handler::ShouldRevalidateArgs;
use crate::data::submission::Submission;
use crate::navigation::location::Location;
use crate::navigation::state::RouterState;
use crate::routing::{RouteId, RouteMatch};

/// Inputs to `matches_to_load`.
#[derive(Debug, Clone, Copy)]
pub struct LoadPlan<'a> {
    pub current: &'a RouterState,
    pub next_location: &'a Location,
    pub next_matches: &'a [RouteMatch],
    pub submission: Option<&'a Submission>,
    /// Successful action result, if an action ran.
    pub action_result: Option<&'a Value>,
    /// Status of the action outcome (200 on success), if an action ran.
    pub action_status: Option<u16>,
    /// Boundary holding an action error; it and its descendants do not load.
    pub action_error_boundary: Option<&'a RouteId>,
    /// `revalidate()` or a fetcher mutation asked for fresh data.
    pub is_revalidation: bool,
}

/// One flag per entry of `plan.next_matches`.
pub fn matches_to_load(plan: &LoadPlan<'_>) -> Vec<bool> {
    let current = plan.current;
    let limit = plan
        .action_error_boundary
        .and_then(|id| plan.next_matches.iter().position(|m| m.route_id() == id))
        .unwrap_or(plan.next_matches.len());

    let current_url = current.location.path();
    let next_url = plan.next_location.path();
    let same_url = current_url.pathname == next_url.pathname && current_url.search == next_url.search;
    let search_changed = current_url.search != next_url.search;
    let skip_default = plan.action_status.is_some_and(|status| status >= 400);
    let revalidation_required = plan.is_revalidation || plan.submission.is_some();

    plan.next_matches
        .iter()
        .enumerate()
        .map(|(index, next)| {
            if index >= limit || !next.route.capabilities.has_loader() {
                return false;
            }
            let id = next.route_id();
            let has_data = current.loader_data.contains_key(id);

            if !current.initialized {
                return !has_data && current.error(id).is_none();
            }

            let previous = current.matches.get(index).filter(|m| m.route_id() == id);
            let Some(previous) = previous else {
                return true;
            };
            if !has_data {
                return true;
            }
            if previous.pathname != next.pathname || previous.params != next.params {
                return true;
            }

            let default_should_revalidate =
                !skip_default && (revalidation_required || same_url || search_changed);
            match &next.route.capabilities.should_revalidate {
                Some(predicate) => predicate.should_revalidate(&ShouldRevalidateArgs {
                    current_url: current_url.clone(),
                    current_params: previous.params.clone(),
                    next_url: next_url.clone(),
                    next_params: next.params.clone(),
                    form_method: plan.submission.map(|s| s.method),
                    form_data: plan.submission.map(|s| s.form_data.clone()),
                    action_result: plan.action_result.cloned(),
                    action_status: plan.action_status,
                    default_should_revalidate,
                }),
                None => default_should_revalidate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::handler::{HandlerArgs, HandlerOutput, RouteError};
    use crate::data::submission::{FormData, FormMethod};
    use crate::navigation::history::HistoryAction;
    use crate::navigation::state::{Navigation, RevalidationState, RouteData};
    use crate::routing::{match_routes, RouteDefinition, RouteTree};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn noop(_: HandlerArgs) -> Result<HandlerOutput, RouteError> {
        Ok(HandlerOutput::Data(Value::Null))
    }

    fn tree() -> RouteTree {
        RouteTree::new(vec![RouteDefinition::new("/")
            .id("root")
            .loader(noop)
            .child(
                RouteDefinition::new("users/:id")
                    .id("user")
                    .loader(noop)
                    .child(RouteDefinition::new("edit").id("edit").should_revalidate(|_: &ShouldRevalidateArgs| true)),
            )
            .child(
                RouteDefinition::new("static")
                    .id("static")
                    .loader(noop)
                    .should_revalidate(|_: &ShouldRevalidateArgs| false),
            )])
        .unwrap()
    }

    fn state_at(tree: &RouteTree, href: &str) -> RouterState {
        let location = Location::initial(href);
        let matches = match_routes(tree, &location.pathname, None).unwrap();
        let loader_data: BTreeMap<RouteId, RouteData> = matches
            .iter()
            .map(|m| (m.route_id().clone(), RouteData::Ready(json!(m.route_id().as_str()))))
            .collect();
        RouterState {
            history_action: HistoryAction::Pop,
            location,
            matches,
            initialized: true,
            navigation: Navigation::idle(),
            revalidation: RevalidationState::Idle,
            loader_data,
            action_data: None,
            errors: None,
            fatal_error: None,
            generation: 0,
        }
    }

    fn plan<'a>(current: &'a RouterState, location: &'a Location, matches: &'a [RouteMatch]) -> LoadPlan<'a> {
        LoadPlan {
            current,
            next_location: location,
            next_matches: matches,
            submission: None,
            action_result: None,
            action_status: None,
            action_error_boundary: None,
            is_revalidation: false,
        }
    }

    #[test]
    fn test_param_change_reloads_only_changed_routes() {
        let tree = tree();
        let current = state_at(&tree, "/users/1");
        let next = Location::initial("/users/2");
        let matches = match_routes(&tree, "/users/2", None).unwrap();
        assert_eq!(matches_to_load(&plan(&current, &next, &matches)), vec![false, true]);
    }

    #[test]
    fn test_search_change_reloads_everything() {
        let tree = tree();
        let current = state_at(&tree, "/users/1");
        let next = Location::initial("/users/1?tab=2");
        let matches = match_routes(&tree, "/users/1", None).unwrap();
        assert_eq!(matches_to_load(&plan(&current, &next, &matches)), vec![true, true]);
    }

    #[test]
    fn test_submission_respects_opt_out() {
        let tree = tree();
        let current = state_at(&tree, "/static");
        let next = Location::initial("/static");
        let matches = match_routes(&tree, "/static", None).unwrap();
        let submission = Submission {
            method: FormMethod::Post,
            form_data: FormData::new(),
        };
        let mut p = plan(&current, &next, &matches);
        p.submission = Some(&submission);
        p.action_status = Some(200);
        assert_eq!(matches_to_load(&p), vec![true, false]);
    }

    #[test]
    fn test_error_status_disables_default() {
        let tree = tree();
        let current = state_at(&tree, "/users/1");
        let next = Location::initial("/users/1");
        let matches = match_routes(&tree, "/users/1", None).unwrap();
        let submission = Submission {
            method: FormMethod::Post,
            form_data: FormData::new(),
        };
        let mut p = plan(&current, &next, &matches);
        p.submission = Some(&submission);
        p.action_status = Some(422);
        assert_eq!(matches_to_load(&p), vec![false, false]);
    }

    #[test]
    fn test_action_error_boundary_limits_loads() {
        let tree = tree();
        let current = state_at(&tree, "/users/1");
        let next = Location::initial("/users/1");
        let matches = match_routes(&tree, "/users/1", None).unwrap();
        let boundary = RouteId::from("user");
        let mut p = plan(&current, &next, &matches);
        p.is_revalidation = true;
        p.action_error_boundary = Some(&boundary);
        assert_eq!(matches_to_load(&p), vec![true, false]);
    }

    #[test]
    fn test_first_hydration_loads_missing_only() {
        let tree = tree();
        let mut current = state_at(&tree, "/users/1");
        current.initialized = false;
        current.loader_data.remove(&RouteId::from("user"));
        let next = current.location.clone();
        let matches = current.matches.clone();
        assert_eq!(matches_to_load(&plan(&current, &next, &matches)), vec![false, true]);
    }

    #[test]
    fn test_new_route_always_loads() {
        let tree = tree();
        let current = state_at(&tree, "/");
        let next = Location::initial("/users/7/edit");
        let matches = match_routes(&tree, "/users/7/edit", None).unwrap();
        // "edit" has no loader even though its predicate says yes.
        assert_eq!(matches_to_load(&plan(&current, &next, &matches)), vec![false, true, false]);
    }
}
