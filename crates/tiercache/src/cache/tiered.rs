//! Two-tier cache: a local tier in front of a remote tier.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, Span};

use super::{Cache, LocalCache, RemoteCache, RemotePool};
use crate::config::TieredCacheConfig;
use crate::encoder::CacheEncoder;
use crate::error::CacheResult;
use crate::metrics::{NoopMetrics, SharedMetrics};

/// Metrics sinks for a tiered cache and each of its tiers.
#[derive(Clone)]
pub struct TieredMetrics {
    pub tiered: SharedMetrics,
    pub local: SharedMetrics,
    pub remote: SharedMetrics,
}

impl Default for TieredMetrics {
    fn default() -> Self {
        Self {
            tiered: NoopMetrics::shared(),
            local: NoopMetrics::shared(),
            remote: NoopMetrics::shared(),
        }
    }
}

/// Reads fall back from `L` to `R`; writes go through `L` then `R`.
///
/// A remote hit is not copied back into the local tier, and a failed remote
/// write does not undo the local one.
pub struct TieredCache<L, R> {
    local: L,
    remote: R,
    metrics: SharedMetrics,
    tracing_enabled: bool,
}

impl<L: Cache, R: Cache> TieredCache<L, R> {
    pub fn new(local: L, remote: R, metrics: SharedMetrics) -> Self {
        Self {
            local,
            remote,
            metrics,
            tracing_enabled: false,
        }
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn into_parts(self) -> (L, R) {
        (self.local, self.remote)
    }

    fn span(&self, op: &'static str, key: &str) -> Span {
        if self.tracing_enabled {
            tracing::debug_span!("tiered_cache", op, key = %key)
        } else {
            Span::none()
        }
    }
}

impl<E: CacheEncoder + Clone> TieredCache<LocalCache<E>, RemoteCache<E>> {
    /// Build both tiers from one configuration.
    ///
    /// The remote tier is connected first. Any remote startup error is
    /// returned and the partially built tiers are dropped; the shared pool
    /// stays initialized for the next attempt.
    pub async fn from_config(
        config: &TieredCacheConfig,
        pool: RemotePool,
        encoder: E,
        metrics: TieredMetrics,
    ) -> CacheResult<Self> {
        config.validate()?;
        let remote = RemoteCache::connect(&config.remote, pool, encoder.clone(), metrics.remote)
            .await
            .map_err(|e| e.error)?;
        let local = LocalCache::new(&config.local, encoder, metrics.local)?;
        tracing::info!(
            shards = config.local.shards,
            seed_nodes = ?config.remote.seed_nodes,
            "tiered cache ready"
        );
        Ok(Self::new(local, remote, metrics.tiered).with_tracing(config.tracing_enabled))
    }
}

#[async_trait]
impl<L: Cache, R: Cache> Cache for TieredCache<L, R> {
    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        async {
            match self.local.get_bytes(key).await {
                Ok(data) => Ok(data),
                Err(_) => self.remote.get_bytes(key).await,
            }
        }
        .instrument(self.span("get_bytes", key))
        .await
    }

    async fn get<T>(&self, key: &str, target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned + Send,
    {
        let result = async {
            match self.local.get(key, target).await {
                Ok(()) => Ok(()),
                Err(_) => self.remote.get(key, target).await,
            }
        }
        .instrument(self.span("get", key))
        .await;

        match result {
            Ok(()) => self.metrics.hit(),
            Err(_) => self.metrics.miss(),
        }
        result
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        async {
            self.local.set_bytes(key, value).await?;
            self.remote.set_bytes(key, value).await
        }
        .instrument(self.span("set_bytes", key))
        .await
    }

    async fn set<T>(&self, key: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let result = async {
            self.local.set(key, value).await?;
            self.remote.set(key, value).await
        }
        .instrument(self.span("set", key))
        .await;

        match result {
            Ok(()) => self.metrics.set(),
            Err(_) => self.metrics.set_collision(),
        }
        result
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let result = async {
            self.local.delete(key).await?;
            self.remote.delete(key).await
        }
        .instrument(self.span("delete", key))
        .await;

        match result {
            Ok(()) => self.metrics.delete_hit(),
            Err(_) => self.metrics.delete_miss(),
        }
        result
    }

    async fn purge(&self) -> CacheResult<()> {
        let result = async {
            self.local.purge().await?;
            self.remote.purge().await
        }
        .instrument(self.span("purge", "*"))
        .await;

        match result {
            Ok(()) => self.metrics.purge_hit(),
            Err(_) => self.metrics.purge_miss(),
        }
        result
    }

    async fn close(&self) {
        self.remote.close().await;
    }
}
