//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router, executor, fetchers, deferreds produce:
//!     → tracing events (structured fields: route_id, generation, key)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout) in binaries
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a subscriber or recorder on its own
//! - Metrics are cheap (no-ops without a recorder)

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
