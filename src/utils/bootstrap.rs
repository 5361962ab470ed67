//! Bootstrap utilities for storefront binaries.
//!
//! Shared initialization code: tracing, startup connection retry, and the
//! wiring of store, cache and projection sync from [`Config`].

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the STOREFRONT_LOG environment variable.
///
/// Defaults to "info" level if STOREFRONT_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Backoff for connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Connect to a backing service with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "sqlite", "redis")
/// * `address` - The address being connected to
/// * `backoff` - Retry schedule, usually [`connection_backoff`]
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error once retries run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    backoff: ExponentialBuilder,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(backoff)
        .notify(|e: &E, delay: Duration| {
            warn!(
                service = service_name,
                address = address,
                error = %e,
                retry_in = ?delay,
                "Connection failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => info!(service = service_name, address = address, "Connected"),
        Err(e) => tracing::error!(
            service = service_name,
            address = address,
            error = %e,
            "Giving up on connection"
        ),
    }
    result
}

#[cfg(all(feature = "sqlite", feature = "redis"))]
pub use wiring::{connect_cache, connect_store, Runtime};

#[cfg(all(feature = "sqlite", feature = "redis"))]
mod wiring {
    use std::sync::Arc;

    use super::{connect_with_retry, connection_backoff};
    use crate::cache::{CacheError, KeyValueStore, RedisKeyValueStore};
    use crate::commands::Storefront;
    use crate::config::Config;
    use crate::store::{SqlStore, StoreError};
    use crate::sync::ProjectionSync;

    /// Open the source-of-truth pool and make sure the schema exists.
    pub async fn connect_store(config: &Config) -> Result<Arc<SqlStore>, StoreError> {
        let storage = &config.storage;
        let store = connect_with_retry("sqlite", &storage.url, connection_backoff(), || {
            SqlStore::connect(&storage.url, storage.max_connections)
        })
        .await?;
        store.init().await?;
        Ok(Arc::new(store))
    }

    pub async fn connect_cache(config: &Config) -> Result<Arc<RedisKeyValueStore>, CacheError> {
        let url = &config.cache.url;
        let cache = connect_with_retry("redis", url, connection_backoff(), || {
            RedisKeyValueStore::new(url)
        })
        .await?;
        Ok(Arc::new(cache))
    }

    /// Store, projection sync and command handlers built from one config.
    pub struct Runtime {
        pub store: Arc<SqlStore>,
        pub sync: Arc<ProjectionSync>,
        pub storefront: Storefront,
    }

    impl Runtime {
        pub async fn connect(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
            let store = connect_store(config).await?;
            let cache: Arc<dyn KeyValueStore> = connect_cache(config).await?;
            let sync = Arc::new(ProjectionSync::new(
                store.clone(),
                cache,
                config.outbox.clone(),
                config.summary.ttl(),
            ));
            let storefront = Storefront::new(store.clone(), sync.clone());
            Ok(Self {
                store,
                sync,
                storefront,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_backoff(times: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_times(times)
    }

    #[tokio::test]
    async fn test_connect_with_retry_succeeds_after_failures() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<u32, String> = connect_with_retry("test", "nowhere", quick_backoff(5), move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("attempt {n} refused"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_connect_with_retry_returns_last_error() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<(), String> = connect_with_retry("test", "nowhere", quick_backoff(2), move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {n} refused"))
        })
        .await;

        assert_eq!(result.unwrap_err(), "attempt 3 refused");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
