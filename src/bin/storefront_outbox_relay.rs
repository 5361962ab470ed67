//! storefront-outbox-relay: Outbox recovery loop
//!
//! Periodically reconciles outbox entries whose projection write failed
//! after commit, until interrupted with Ctrl-C.
//!
//! ## Architecture
//! ```text
//! [projection_outbox] --(pending entries)--> [relay] --(reload source)--> [Redis]
//! ```
//!
//! ## Configuration
//! - STOREFRONT_CONFIG: Path to a YAML config file (optional)
//! - STOREFRONT__OUTBOX__RECOVERY_INTERVAL_SECS: Seconds between passes (default: 5)
//! - STOREFRONT__OUTBOX__MIN_AGE_SECS: Minimum entry age before recovery (default: 30)
//! - STOREFRONT__OUTBOX__MAX_RETRIES: Attempts before an entry is left alone (default: 10)

use tracing::{error, info, warn};

use storefront::config::Config;
use storefront::store::ProjectionOutbox;
use storefront::sync::spawn_recovery_task;
use storefront::utils::bootstrap::{init_tracing, Runtime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    if !config.outbox.enabled {
        warn!("Outbox recovery disabled by configuration, exiting");
        return Ok(());
    }

    let runtime = Runtime::connect(&config).await?;
    let backlog = runtime.store.backlog().await?;
    info!(
        backlog = backlog,
        interval_secs = config.outbox.recovery_interval_secs,
        "storefront-outbox-relay started"
    );

    let handle = spawn_recovery_task(runtime.sync.clone(), config.outbox.recovery_interval());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.stop();

    Ok(())
}
