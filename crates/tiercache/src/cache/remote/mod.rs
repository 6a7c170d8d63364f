//! Remote (Redis-protocol) cache tier.
//!
//! Connections are checked out of a shared [`RemotePool`] for a single call
//! and returned immediately afterwards.
//!
//! ## Fuzzy delete
//!
//! Redis has no pattern delete, so [`RemoteCache::delete`] treats the key as a
//! glob pattern:
//!
//! ```text
//! KEYS pattern          → matched keys
//! MULTI                 → open an atomic batch
//! DEL k1 … DEL kn       → queued
//! EXEC                  → applied together
//! ```
//!
//! The match and the batch run over the same connection. Against a cluster,
//! a batch is routed by its first key, so keys living in different hash slots
//! cannot be deleted atomically: EXEC fails with a cross-slot error instead.
//! Use hash tags (`{user:1}:profile`) to keep related keys in one slot, or
//! [`RemoteCache::delete_keys`] for an explicit, non-atomic list.

pub mod pool;

pub use pool::{PooledConnection, RemotePool};

use async_trait::async_trait;
use redis::aio::ConnectionLike;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, Span, field};

use super::Cache;
use crate::config::RemoteCacheConfig;
use crate::encoder::{CacheEncoder, MessagePackEncoder};
use crate::error::{CacheError, CacheResult, StartupError};
use crate::metrics::SharedMetrics;

/// Cache tier backed by a shared Redis-protocol connection pool.
pub struct RemoteCache<E = MessagePackEncoder> {
    pool: RemotePool,
    encoder: E,
    metrics: SharedMetrics,
    tracing_enabled: bool,
}

impl<E: CacheEncoder> RemoteCache<E> {
    /// Create a remote cache over `pool`.
    ///
    /// Initializes the pool if nobody has yet, refreshes the topology, then
    /// authenticates when a token is configured. A failure in any step still
    /// hands back the cache inside [`StartupError`].
    pub async fn connect(
        config: &RemoteCacheConfig,
        pool: RemotePool,
        encoder: E,
        metrics: SharedMetrics,
    ) -> Result<Self, StartupError<Self>> {
        let cache = Self {
            pool,
            encoder,
            metrics,
            tracing_enabled: config.tracing_enabled,
        };
        match cache.start(config).await {
            Ok(()) => Ok(cache),
            Err(error) => {
                tracing::warn!(error = %error, "remote cache started with errors");
                Err(StartupError { cache, error })
            }
        }
    }

    async fn start(&self, config: &RemoteCacheConfig) -> CacheResult<()> {
        config.validate()?;
        self.pool.initialize(config).await?;
        self.refresh().await?;
        if let Some(token) = config.auth_token() {
            self.authenticate(token).await?;
        }
        Ok(())
    }

    /// Check that the store is reachable.
    ///
    /// Creating a cluster connection loads the slot map, and PING is
    /// answered by every primary.
    pub async fn refresh(&self) -> CacheResult<()> {
        let mut conn = self.pool.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Send AUTH over one pooled connection.
    pub async fn authenticate(&self, token: &str) -> CacheResult<()> {
        let mut conn = self.pool.connection().await?;
        let reply: redis::RedisResult<()> = redis::cmd("AUTH").arg(token).query_async(&mut conn).await;
        reply.map_err(|e| CacheError::Auth(e.to_string()))
    }

    pub fn pool(&self) -> &RemotePool {
        &self.pool
    }

    /// Delete an explicit list of keys, one DEL per key, outside any
    /// transaction. Returns how many keys existed.
    pub async fn delete_keys(&self, keys: &[&str]) -> CacheResult<usize> {
        let span = self.span("delete_keys", "DEL", &keys.join(" "));
        let result = async {
            let mut conn = self.pool.connection().await?;
            let mut removed = 0;
            for key in keys {
                let count: usize = redis::cmd("DEL").arg(*key).query_async(&mut conn).await?;
                removed += count;
            }
            Ok::<_, CacheError>(removed)
        }
        .instrument(span.clone())
        .await;

        match &result {
            Ok(removed) if *removed > 0 => {
                self.metrics.delete_hit();
                span.record("result", "delete");
            }
            Ok(_) => {
                self.metrics.delete_miss();
                span.record("result", "miss");
            }
            Err(_) => {
                self.metrics.delete_miss();
                span.record("result", "fail");
            }
        }
        if let Ok(removed) = &result {
            span.record("num_keys", *removed);
        }
        result
    }

    fn span(&self, op: &'static str, command: &'static str, key: &str) -> Span {
        if self.tracing_enabled {
            tracing::info_span!(
                "remote_cache",
                op,
                command,
                key = %key,
                result = field::Empty,
                num_keys = field::Empty,
            )
        } else {
            Span::none()
        }
    }

    async fn fuzzy_delete(&self, pattern: &str) -> (Option<usize>, CacheResult<()>) {
        match self.pool.connection().await {
            Ok(mut conn) => delete_matching(&mut conn, pattern).await,
            Err(e) => (None, Err(e)),
        }
    }
}

/// KEYS then an atomic DEL batch over one connection.
///
/// Returns the number of matched keys (`None` when matching failed) and the
/// batch result. A failed or empty match still sends `MULTI` + `EXEC`, so a
/// broken connection surfaces as the batch error.
async fn delete_matching<C>(conn: &mut C, pattern: &str) -> (Option<usize>, CacheResult<()>)
where
    C: ConnectionLike + Send,
{
    let matched: redis::RedisResult<Vec<String>> =
        redis::cmd("KEYS").arg(pattern).query_async(&mut *conn).await;

    let mut batch = redis::pipe();
    let count = match matched {
        Ok(keys) if !keys.is_empty() => {
            batch.atomic();
            for key in &keys {
                batch.del(key).ignore();
            }
            Some(keys.len())
        }
        Ok(_) => {
            empty_transaction(&mut batch);
            Some(0)
        }
        Err(e) => {
            tracing::warn!(pattern, error = %e, "KEYS failed; issuing empty delete batch");
            empty_transaction(&mut batch);
            None
        }
    };

    let result: redis::RedisResult<()> = batch.query_async(&mut *conn).await;
    (count, result.map_err(Into::into))
}

/// redis-rs answers an empty atomic pipeline locally, so MULTI and EXEC are
/// queued as plain commands.
fn empty_transaction(batch: &mut redis::Pipeline) {
    batch.cmd("MULTI").ignore().cmd("EXEC").ignore();
}

#[async_trait]
impl<E: CacheEncoder> Cache for RemoteCache<E> {
    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        let span = self.span("get_bytes", "GET", key);
        let result = async {
            let mut conn = self.pool.connection().await?;
            let data: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            data.ok_or_else(|| CacheError::not_found(key))
        }
        .instrument(span.clone())
        .await;

        span.record("result", if result.is_ok() { "hit" } else { "miss" });
        result
    }

    async fn get<T>(&self, key: &str, target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned + Send,
    {
        let result = match self.get_bytes(key).await {
            Ok(data) => self.encoder.decode(&data, target),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.metrics.hit(),
            Err(_) => self.metrics.miss(),
        }
        result
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let span = self.span("set_bytes", "SET", key);
        let result = async {
            let mut conn = self.pool.connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(())
        }
        .instrument(span.clone())
        .await;

        span.record("result", if result.is_ok() { "set" } else { "fail" });
        result
    }

    async fn set<T>(&self, key: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        // The outcome counters describe encoding; store failures surface
        // through the returned error and the span.
        let encoded = match self.encoder.encode(value) {
            Ok(encoded) => {
                self.metrics.set();
                encoded
            }
            Err(e) => {
                self.metrics.set_collision();
                return Err(e);
            }
        };
        self.set_bytes(key, &encoded).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let span = self.span("delete", "KEYS+MULTI+DEL+EXEC", key);
        let (matched, result) = self.fuzzy_delete(key).instrument(span.clone()).await;

        match matched {
            Some(count) if count > 0 => self.metrics.delete_hit(),
            _ => self.metrics.delete_miss(),
        }
        span.record("num_keys", matched.unwrap_or(0));
        span.record("result", if result.is_ok() { "delete" } else { "fail" });
        result
    }

    async fn purge(&self) -> CacheResult<()> {
        let span = self.span("purge", "FLUSHALL", "*");
        let result = async {
            let mut conn = self.pool.connection().await?;
            let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
            Ok::<_, CacheError>(())
        }
        .instrument(span.clone())
        .await;

        match result {
            Ok(()) => self.metrics.purge_hit(),
            Err(_) => self.metrics.purge_miss(),
        }
        span.record("result", if result.is_ok() { "purge" } else { "fail" });
        result
    }

    /// Close the shared pool for every cache using it.
    async fn close(&self) {
        self.pool.close();
    }
}
