//! Two-tier caching.
//!
//! A [`TieredCache`] puts an in-process [`LocalCache`] in front of a
//! [`RemoteCache`] backed by a Redis-protocol store. Reads fall back from the
//! local tier to the remote one; writes go through both in order.
//!
//! ```no_run
//! use tiercache::{Cache, RemotePool, TieredCache, TieredMetrics, load_config};
//! use tiercache::encoder::MessagePackEncoder;
//!
//! # async fn run() -> tiercache::CacheResult<()> {
//! let config = load_config(None)?;
//! let cache = TieredCache::from_config(
//!     &config,
//!     RemotePool::global(),
//!     MessagePackEncoder,
//!     TieredMetrics::default(),
//! )
//! .await?;
//!
//! cache.set("spot:42", &1250_i64).await?;
//! let mut price = 0_i64;
//! cache.get("spot:42", &mut price).await?;
//! cache.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod testing;

pub use cache::tiered::TieredMetrics;
pub use cache::{Cache, LocalCache, LocalEngine, RemoteCache, RemotePool, TieredCache};
pub use config::{LocalCacheConfig, RemoteCacheConfig, StoreMode, TieredCacheConfig, load_config};
pub use error::{CacheError, CacheResult, StartupError};
pub use metrics::{CacheMetrics, CounterMetrics, NoopMetrics, PrometheusCacheMetrics, SharedMetrics};
pub use observability::init_tracing;
