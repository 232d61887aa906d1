//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (on tree construction / patch):
//!     RouteDefinition[]
//!     → tree.rs (arena, ids, capability records)
//!     → flatten.rs (branches, scores, compiled patterns)
//!     → Freeze as immutable RouteTree
//!
//! Lookup (every navigation attempt):
//!     location
//!     → matcher.rs (strip basename, first matching ranked branch)
//!     → Return: Vec<RouteMatch> or not-found
//!
//! Relative targets:
//!     current matches → resolve.rs → absolute Path
//! ```
//!
//! # Design Decisions
//! - Routes compiled once per tree, immutable afterwards
//! - Deterministic: same input always matches same route
//! - Highest score wins; declaration order breaks ties

pub mod flatten;
pub mod matcher;
pub mod params;
pub mod pattern;
pub mod resolve;
pub mod tree;

pub use flatten::Branch;
pub use matcher::{match_partial, match_routes, strip_basename, RouteMatch};
pub use params::Params;
pub use pattern::{generate_path, match_path, PathMatch, PathPattern};
pub use resolve::{resolve_path, resolve_to, RelativeRouting};
pub use tree::{RouteCapabilities, RouteDefinition, RouteId, RouteNode, RouteTree};
