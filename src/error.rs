//! Crate-level error definitions.

use thiserror::Error;

use crate::routing::RouteId;

/// Errors surfaced by route configuration, matching helpers and the router.
///
/// Failures raised by loaders and actions are not `RouterError`s: they are
/// [`RouteError`](crate::data::RouteError) values recorded in the router
/// state against the owning error boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// An index route was declared with children.
    #[error("Index routes must not have child routes (route path \"{path}\")")]
    IndexRouteWithChildren { path: String },

    /// An absolute child path does not extend the combined parent path.
    #[error("Absolute route path \"{path}\" nested under path \"{parent}\" is not valid")]
    AbsolutePathOutsideParent { path: String, parent: String },

    /// Two routes were given the same id.
    #[error("Duplicate route id: {0}")]
    DuplicateRouteId(RouteId),

    /// A route id was not found in the route tree.
    #[error("Unknown route id: {0}")]
    UnknownRoute(RouteId),

    /// `generate_path` was called without a required parameter.
    #[error("Missing \":{0}\" param")]
    MissingParam(String),

    /// A compiled pattern could not be turned into a matcher.
    #[error("Invalid route pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Redirect chain exceeded the configured limit.
    #[error("Exceeded {0} redirects while navigating")]
    RedirectLimit(u32),

    /// A route displaying an error path tried to read data of itself or an ancestor.
    #[error("Route {reader} is rendering an error and cannot read loader data of {target}")]
    DataReadDuringError { reader: RouteId, target: RouteId },

    /// The router was used after `dispose()`.
    #[error("Router has been disposed")]
    Disposed,
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;
