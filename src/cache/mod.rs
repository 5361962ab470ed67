//! Key-value cache holding the read projections.
//!
//! The projection repositories only need a small slice of Redis: plain
//! string keys, sets used as id indexes, and (for product summaries) hashes
//! with a TTL. `KeyValueStore` captures exactly that slice so the
//! repositories run unchanged against Redis or the in-memory store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKeyValueStore;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur talking to the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Operations the projection layer performs against the cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read many values in one round trip. The result is aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set; empty if the set does not exist.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Delete every key matching a glob pattern (`*` wildcard).
    /// Returns the number of keys removed.
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;

    /// Replace the fields of a hash.
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Read every field of a hash; empty if the hash does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Set a time-to-live on a key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Match a key against a glob pattern supporting only `*`.
pub(crate) fn glob_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    let middle = &parts[1..parts.len() - 1];

    let Some(mut remaining) = key.strip_prefix(first) else {
        return false;
    };

    for part in middle {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_exact() {
        assert!(glob_matches("orders:all", "orders:all"));
        assert!(!glob_matches("orders:all", "orders:al"));
    }

    #[test]
    fn test_glob_prefix() {
        assert!(glob_matches("orders:customer:*", "orders:customer:12"));
        assert!(glob_matches("orders:customer:*", "orders:customer:"));
        assert!(!glob_matches("orders:customer:*", "orders:all"));
    }

    #[test]
    fn test_glob_infix() {
        assert!(glob_matches("order*:*", "orders:customer:1"));
        assert!(!glob_matches("customer*:x", "customers:all"));
    }
}
