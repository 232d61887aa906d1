//! Route matching and navigation data engine.
//!
//! Nested route trees are flattened into ranked branches and matched against
//! locations. A [`Router`] drives navigations over an injected history: it
//! runs actions and loaders, bubbles their errors to error boundaries,
//! follows redirects and publishes immutable [`RouterState`] snapshots.

// Matching
pub mod routing;

// Navigation and data
pub mod data;
pub mod navigation;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::RouterConfig;
pub use data::{DeferredData, FormData, FormMethod, HandlerArgs, HandlerOutput, RouteError};
pub use error::{RouterError, RouterResult};
pub use navigation::{
    FetchOptions, History, HydrationData, Location, MemoryHistory, NavigateOptions, NavigationOutcome, Router,
    RouterOptions, RouterState,
};
pub use routing::{generate_path, match_path, match_routes, RouteDefinition, RouteId, RouteMatch, RouteTree};
