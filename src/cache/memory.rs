//! In-memory KeyValueStore for testing.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{glob_matches, CacheError, KeyValueStore, Result};

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    expiries: HashMap<String, Instant>,
}

impl State {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.expiries.remove(&key);
            self.values.remove(&key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expiries.remove(key);
        self.values.remove(key).is_some()
    }
}

/// Mock cache that keeps everything in a process-local map.
///
/// Mirrors the Redis semantics the repositories rely on: empty sets vanish,
/// `SET` clears any TTL, reads of the wrong type behave like a miss.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    state: RwLock<State>,
    fail_writes: RwLock<bool>,
    fail_reads: RwLock<bool>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutating call fail until reset.
    pub async fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    /// Make every read call fail until reset.
    pub async fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.write().await = fail;
    }

    /// All live keys, sorted. Test helper.
    pub async fn keys(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        state.purge_expired();
        let mut keys: Vec<String> = state.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remaining TTL of a key, if one is set. Test helper.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        state
            .expiries
            .get(key)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_writes.read().await {
            return Err(CacheError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_reads.read().await {
            return Err(CacheError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_read().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        Ok(match state.values.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        state.expiries.remove(key);
        state
            .values
            .insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check_read().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        Ok(keys
            .iter()
            .map(|key| match state.values.get(key) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        for key in keys {
            state.remove(key);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        match state.values.get_mut(key) {
            Some(Value::Set(set)) => {
                set.insert(member.to_string());
            }
            _ => {
                let set = HashSet::from([member.to_string()]);
                state.values.insert(key.to_string(), Value::Set(set));
            }
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let now_empty = match state.values.get_mut(key) {
            Some(Value::Set(set)) => {
                set.remove(member);
                set.is_empty()
            }
            _ => false,
        };
        if now_empty {
            state.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check_read().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        Ok(match state.values.get(key) {
            Some(Value::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let matching: Vec<String> = state
            .values
            .keys()
            .filter(|k| glob_matches(pattern, k))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        Ok(matching.len())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        let entry = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        if !matches!(entry, Value::Hash(_)) {
            *entry = Value::Hash(HashMap::new());
        }
        if let Value::Hash(hash) = entry {
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_read().await?;
        let mut state = self.state.write().await;
        state.purge_expired();
        Ok(match state.values.get(key) {
            Some(Value::Hash(hash)) => hash.clone(),
            _ => HashMap::new(),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        if state.values.contains_key(key) {
            state.expiries.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }
}
