//! Cache outcome counters.
//!
//! Every tier records its outcomes through a [`CacheMetrics`] implementation:
//! - [`NoopMetrics`] when nothing should be recorded
//! - [`CounterMetrics`] for in-process counters (tests, diagnostics)
//! - [`PrometheusCacheMetrics`] for labelled counters exported to Prometheus

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS: &str = "cache_hits";
    pub const CACHE_MISSES: &str = "cache_misses";
    pub const CACHE_SETS: &str = "cache_sets";
    pub const CACHE_SETS_COLLISIONS: &str = "cache_sets_collisions";
    pub const CACHE_DELETES_HITS: &str = "cache_deletes_hits";
    pub const CACHE_DELETES_MISSES: &str = "cache_deletes_misses";
    pub const CACHE_PURGES_HITS: &str = "cache_purges_hits";
    pub const CACHE_PURGES_MISSES: &str = "cache_purges_misses";
}

/// Records cache operation outcomes.
///
/// Recording is infallible: an implementation must never fail or block the
/// surrounding cache operation.
pub trait CacheMetrics: Send + Sync {
    fn hit(&self);
    fn miss(&self);
    fn set(&self);
    /// Fires when a set could not be applied (historically named; it does not
    /// detect key collisions).
    fn set_collision(&self);
    fn delete_hit(&self);
    fn delete_miss(&self);
    fn purge_hit(&self);
    fn purge_miss(&self);
}

/// Shared metrics handle held by every cache value.
pub type SharedMetrics = Arc<dyn CacheMetrics>;

/// Metrics sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl NoopMetrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(NoopMetrics)
    }
}

impl CacheMetrics for NoopMetrics {
    fn hit(&self) {}
    fn miss(&self) {}
    fn set(&self) {}
    fn set_collision(&self) {}
    fn delete_hit(&self) {}
    fn delete_miss(&self) {}
    fn purge_hit(&self) {}
    fn purge_miss(&self) {}
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub set_collisions: u64,
    pub delete_hits: u64,
    pub delete_misses: u64,
    pub purge_hits: u64,
    pub purge_misses: u64,
}

impl MetricsSnapshot {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-process atomic counters.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    set_collisions: AtomicU64,
    delete_hits: AtomicU64,
    delete_misses: AtomicU64,
    purge_hits: AtomicU64,
    purge_misses: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_collisions: self.set_collisions.load(Ordering::Relaxed),
            delete_hits: self.delete_hits.load(Ordering::Relaxed),
            delete_misses: self.delete_misses.load(Ordering::Relaxed),
            purge_hits: self.purge_hits.load(Ordering::Relaxed),
            purge_misses: self.purge_misses.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for CounterMetrics {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn set_collision(&self) {
        self.set_collisions.fetch_add(1, Ordering::Relaxed);
    }

    fn delete_hit(&self) {
        self.delete_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn delete_miss(&self) {
        self.delete_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn purge_hit(&self) {
        self.purge_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn purge_miss(&self) {
        self.purge_misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counters labelled by `client` and `cache_name`, emitted through the
/// `metrics` facade.
///
/// Without an installed recorder the counters are dropped, so this is safe to
/// use before (or without) [`init_prometheus`].
#[derive(Debug, Clone)]
pub struct PrometheusCacheMetrics {
    client: String,
    name: String,
}

impl PrometheusCacheMetrics {
    pub fn new(client: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            name: cache_name.into(),
        }
    }

    pub fn shared(client: impl Into<String>, cache_name: impl Into<String>) -> SharedMetrics {
        Arc::new(Self::new(client, cache_name))
    }

    fn increment(&self, metric: &'static str) {
        counter!(
            metric,
            "client" => self.client.clone(),
            "cache_name" => self.name.clone()
        )
        .increment(1);
    }
}

impl CacheMetrics for PrometheusCacheMetrics {
    fn hit(&self) {
        self.increment(names::CACHE_HITS);
    }

    fn miss(&self) {
        self.increment(names::CACHE_MISSES);
    }

    fn set(&self) {
        self.increment(names::CACHE_SETS);
    }

    fn set_collision(&self) {
        self.increment(names::CACHE_SETS_COLLISIONS);
    }

    fn delete_hit(&self) {
        self.increment(names::CACHE_DELETES_HITS);
    }

    fn delete_miss(&self) {
        self.increment(names::CACHE_DELETES_MISSES);
    }

    fn purge_hit(&self) {
        self.increment(names::CACHE_PURGES_HITS);
    }

    fn purge_miss(&self) {
        self.increment(names::CACHE_PURGES_MISSES);
    }
}

/// Install the Prometheus recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized
/// or another recorder is installed.
pub fn init_prometheus() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_prometheus() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}
