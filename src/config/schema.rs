//! Configuration schema definitions.
//!
//! A route manifest is the data-only half of a route tree: patterns, ids,
//! boundaries and nesting. Loaders and actions are attached in code after
//! conversion to [`RouteDefinition`]s.

use serde::{Deserialize, Serialize};

use crate::navigation::router::DEFAULT_MAX_REDIRECTS;
use crate::navigation::state::HydrationData;
use crate::routing::RouteDefinition;

/// Root configuration of a router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Prefix every URL of the application lives under.
    pub basename: String,

    /// Redirects followed in one navigation before giving up.
    pub max_redirects: u32,

    /// Nested route manifest.
    pub routes: Vec<RouteConfig>,

    /// Data from a server render, keyed by route id.
    pub hydration: Option<HydrationData>,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            basename: "/".to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            routes: Vec::new(),
            hydration: None,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Route definitions for `RouteTree::new` / `RouterOptions`.
    pub fn route_definitions(&self) -> Vec<RouteDefinition> {
        self.routes.iter().map(RouteConfig::to_definition).collect()
    }
}

/// One route of the manifest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Explicit id; generated from the tree position when absent.
    pub id: Option<String>,

    /// Pattern; absent for pathless layout and index routes.
    pub path: Option<String>,

    pub index: bool,

    pub case_sensitive: bool,

    pub error_boundary: bool,

    pub children: Vec<RouteConfig>,
}

impl RouteConfig {
    pub fn to_definition(&self) -> RouteDefinition {
        RouteDefinition {
            id: self.id.clone(),
            path: self.path.clone(),
            index: self.index,
            case_sensitive: self.case_sensitive,
            error_boundary: self.error_boundary,
            children: self.children.iter().map(RouteConfig::to_definition).collect(),
            ..RouteDefinition::default()
        }
    }
}

impl From<RouteConfig> for RouteDefinition {
    fn from(config: RouteConfig) -> Self {
        config.to_definition()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Record navigation and handler metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: RouterConfig = toml::from_str("").unwrap();
        assert_eq!(config.basename, "/");
        assert_eq!(config.max_redirects, 20);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_nested_routes_convert() {
        let config: RouterConfig = toml::from_str(
            r#"
            basename = "/app"

            [[routes]]
            path = "/"
            id = "root"
            error_boundary = true

            [[routes.children]]
            index = true

            [[routes.children]]
            path = "users/:id"
            "#,
        )
        .unwrap();
        let defs = config.route_definitions();
        assert_eq!(defs.len(), 1);
        assert!(defs[0].error_boundary);
        assert_eq!(defs[0].children.len(), 2);
        assert!(defs[0].children[0].index);
        assert_eq!(defs[0].children[1].path.as_deref(), Some("users/:id"));
    }
}
