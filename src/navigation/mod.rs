//! Navigation subsystem.
//!
//! # Data Flow
//! ```text
//! navigate / go / revalidate / fetch
//!     → router.rs (generation, abort of superseded work)
//!     → revalidation.rs (which loaders run)
//!     → data::executor (action, then loaders)
//!     → boundary.rs (errors to nearest boundary)
//!     → state.rs (new immutable RouterState)
//!     → history.rs (push / replace) → subscribers.rs (notify once)
//! ```
//!
//! # Design Decisions
//! - The router is the only writer of state and history
//! - History is injected; `MemoryHistory` serves tests and headless hosts
//! - Snapshots are `Arc<RouterState>` and never mutated in place

pub mod boundary;
pub mod history;
pub mod location;
pub mod revalidation;
pub mod router;
pub mod state;
pub mod subscribers;

pub use boundary::{find_nearest_boundary, PlacedErrors};
pub use history::{History, HistoryAction, HistoryUpdate, MemoryHistory};
pub use location::{parse_path, Location, PartialPath, Path};
pub use revalidation::{matches_to_load, LoadPlan};
pub use router::{FetchOptions, NavigateOptions, NavigationOutcome, Router, RouterOptions, DEFAULT_MAX_REDIRECTS};
pub use state::{HydrationData, Navigation, NavigationStatus, RevalidationState, RouteData, RouterState};
pub use subscribers::{Subscribers, Unsubscribe};
