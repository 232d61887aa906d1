//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber for binaries and tests
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Initialization is idempotent so tests may call it repeatedly

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` (an `EnvFilter` directive such as `info` or
/// `route_navigator=debug`).
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
    if result.is_err() {
        tracing::trace!("Logging already initialized");
    }
}
