//! route-cli
//!
//! Loads a TOML route manifest and answers questions about it as JSON.
//!
//! ```text
//! route-cli --config routes.toml match /users/42?tab=posts
//! route-cli --config routes.toml ranks
//! route-cli generate /users/:id id=42
//! route-cli --config routes.toml navigate /users/1 ../2 /missing
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use route_navigator::config::{load_config, RouterConfig};
use route_navigator::navigation::{parse_path, MemoryHistory, NavigateOptions, Router, RouterOptions};
use route_navigator::observability::{init_logging, metrics};
use route_navigator::routing::{generate_path, match_routes, Params, RouteTree};

#[derive(Parser)]
#[command(name = "route-cli")]
#[command(about = "Inspect route manifests: matching, ranking and path generation", long_about = None)]
struct Cli {
    /// Route manifest (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the matches of a location
    Match { location: String },
    /// Print every branch with its score, best first
    Ranks,
    /// Fill a pattern with `name=value` params
    Generate { pattern: String, params: Vec<String> },
    /// Run navigations against an in-memory history and print the final state
    Navigate { targets: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    init_logging(&config.observability.log_level);
    metrics::set_enabled(config.observability.metrics_enabled);

    tracing::debug!(
        basename = %config.basename,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let output = match cli.command {
        Commands::Match { location } => {
            let tree = RouteTree::new(config.route_definitions())?;
            let pathname = parse_path(&location).pathname.unwrap_or_else(|| "/".to_string());
            match match_routes(&tree, &pathname, Some(&config.basename)) {
                Some(matches) => serde_json::to_value(matches)?,
                None => Value::Null,
            }
        }
        Commands::Ranks => {
            let tree = RouteTree::new(config.route_definitions())?;
            let branches: Vec<Value> = tree
                .branches()
                .iter()
                .map(|branch| {
                    json!({
                        "path": branch.path,
                        "score": branch.score,
                        "routes": branch.route_ids().map(|id| id.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Value::Array(branches)
        }
        Commands::Generate { pattern, params } => {
            let mut values = Params::new();
            for pair in &params {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("expected name=value, got \"{pair}\""))?;
                values.insert(name, value);
            }
            Value::String(generate_path(&pattern, &values)?)
        }
        Commands::Navigate { targets } => {
            let history = Arc::new(MemoryHistory::at(&config.basename));
            let mut options = RouterOptions::new(config.route_definitions(), history)
                .basename(config.basename.clone())
                .max_redirects(config.max_redirects);
            if let Some(hydration) = config.hydration.clone() {
                options = options.hydration_data(hydration);
            }
            let router = Router::new(options)?;
            router.initialize().await?;
            for target in &targets {
                router.navigate(target, NavigateOptions::default()).await?;
            }
            let state = serde_json::to_value(&*router.state())?;
            router.dispose();
            state
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
