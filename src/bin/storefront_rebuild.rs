//! storefront-rebuild: Rebuild read projections from the source of truth
//!
//! Clears the cached projections of one family and rewrites them from the
//! SQLite tables. Used after a cache flush or when projections have drifted.
//!
//! ## Usage
//! ```text
//! storefront-rebuild <customers|products|orders|summaries|all> [config.yaml]
//! ```
//!
//! ## Configuration
//! - STOREFRONT_CONFIG: Path to a YAML config file (optional)
//! - STOREFRONT__STORAGE__URL: SQLite URL (default: sqlite://storefront.db)
//! - STOREFRONT__CACHE__URL: Redis URL (default: redis://127.0.0.1:6379)

use tracing::{error, info};

use storefront::config::Config;
use storefront::projection::EntityKind;
use storefront::utils::bootstrap::{init_tracing, Runtime};

const USAGE: &str = "usage: storefront-rebuild <customers|products|orders|summaries|all> [config.yaml]";

enum Target {
    Kind(EntityKind),
    Summaries,
    All,
}

fn parse_target(raw: &str) -> Option<Target> {
    match raw {
        "summaries" | "summary" => Some(Target::Summaries),
        "all" => Some(Target::All),
        other => EntityKind::parse(other).map(Target::Kind),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let target = args.next().and_then(|raw| parse_target(&raw)).ok_or(USAGE)?;
    let config_path = args.next();

    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let runtime = Runtime::connect(&config).await?;
    let sync = &runtime.sync;

    match target {
        Target::Kind(kind) => {
            let count = sync.rebuild(kind).await?;
            info!(entity = %kind, count = count, "Rebuild complete");
        }
        Target::Summaries => {
            let count = sync.rebuild_summaries().await?;
            info!(count = count, "Product summary rebuild complete");
        }
        Target::All => {
            sync.rebuild_everything().await?;
        }
    }

    Ok(())
}
