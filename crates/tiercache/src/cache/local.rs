//! Local (in-process) cache tier.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::Span;

use super::Cache;
use crate::config::LocalCacheConfig;
use crate::encoder::{CacheEncoder, MessagePackEncoder};
use crate::error::{CacheError, CacheResult};
use crate::metrics::SharedMetrics;

/// A stored value and its expiry deadline.
#[derive(Debug, Clone)]
struct CachedEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Sharded byte store with per-entry TTL.
///
/// Expired entries are never returned. They are dropped lazily on access and
/// by a background sweeper running on the ambient tokio runtime, which stops
/// when the engine is dropped.
pub struct LocalEngine {
    map: Arc<DashMap<String, CachedEntry>>,
    ttl: Option<Duration>,
    sweeper: Option<JoinHandle<()>>,
}

impl LocalEngine {
    /// Build an engine. `shards` must already be validated (0, or a power of
    /// two >= 2).
    pub fn new(shards: usize, ttl: Option<Duration>, eviction_interval: Option<Duration>) -> Self {
        let map = if shards == 0 {
            DashMap::new()
        } else {
            DashMap::with_shard_amount(shards)
        };
        let map = Arc::new(map);

        let sweeper = match (ttl, eviction_interval) {
            (Some(_), Some(interval)) => spawn_sweeper(Arc::downgrade(&map), interval),
            _ => None,
        };

        Self { map, ttl, sweeper }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        if let Some(entry) = self.map.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.data.clone());
            }
        } else {
            return None;
        }
        self.map.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.map
            .insert(key.to_string(), CachedEntry::new(value, self.ttl));
    }

    /// Remove `key`, returning whether a live entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.map
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(Instant::now()))
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        remove_expired(&self.map)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn remove_expired(map: &DashMap<String, CachedEntry>) -> usize {
    let now = Instant::now();
    let before = map.len();
    map.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(map.len())
}

fn spawn_sweeper(
    map: Weak<DashMap<String, CachedEntry>>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime, local cache expiry is lazy only");
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(map) = map.upgrade() else {
                break;
            };
            let removed = remove_expired(&map);
            if removed > 0 {
                tracing::debug!(removed, "evicted expired local cache entries");
            }
        }
    }))
}

/// Cache tier backed by a [`LocalEngine`].
pub struct LocalCache<E = MessagePackEncoder> {
    engine: LocalEngine,
    encoder: E,
    metrics: SharedMetrics,
    tracing_enabled: bool,
}

impl<E: CacheEncoder> LocalCache<E> {
    /// Create a local cache.
    ///
    /// Fails with [`CacheError::Config`] on an invalid shard count, before
    /// any engine is built.
    pub fn new(config: &LocalCacheConfig, encoder: E, metrics: SharedMetrics) -> CacheResult<Self> {
        config.validate()?;
        let engine = LocalEngine::new(config.shards, config.ttl(), config.eviction_interval());
        Ok(Self {
            engine,
            encoder,
            metrics,
            tracing_enabled: config.tracing_enabled,
        })
    }

    pub fn engine(&self) -> &LocalEngine {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    fn span(&self, name: &'static str, key: &str) -> Span {
        if self.tracing_enabled {
            tracing::debug_span!("local_cache", op = name, key = %key)
        } else {
            Span::none()
        }
    }

    fn lookup(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.span("get_bytes", key).in_scope(|| {
            self.engine
                .get(key)
                .ok_or_else(|| CacheError::not_found(key))
        })
    }

    fn store(&self, key: &str, value: Vec<u8>) {
        self.span("set_bytes", key)
            .in_scope(|| self.engine.set(key, value));
    }
}

#[async_trait]
impl<E: CacheEncoder> Cache for LocalCache<E> {
    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.lookup(key)
    }

    async fn get<T>(&self, key: &str, target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned + Send,
    {
        let result = self
            .lookup(key)
            .and_then(|data| self.encoder.decode(&data, target));
        match result {
            Ok(()) => self.metrics.hit(),
            Err(_) => self.metrics.miss(),
        }
        result
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.store(key, value.to_vec());
        Ok(())
    }

    async fn set<T>(&self, key: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        match self.encoder.encode(value) {
            Ok(encoded) => {
                self.store(key, encoded);
                self.metrics.set();
                Ok(())
            }
            Err(e) => {
                self.metrics.set_collision();
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let removed = self.span("delete", key).in_scope(|| self.engine.delete(key));
        if removed {
            self.metrics.delete_hit();
            Ok(())
        } else {
            self.metrics.delete_miss();
            Err(CacheError::not_found(key))
        }
    }

    async fn purge(&self) -> CacheResult<()> {
        self.span("purge", "*").in_scope(|| self.engine.clear());
        self.metrics.purge_hit();
        Ok(())
    }
}
