//! Cache tiers and the contract they share.
//!
//! ## Architecture
//!
//! - **Local ([`LocalCache`])**: in-process sharded map, per instance
//! - **Remote ([`RemoteCache`])**: Redis-protocol store shared across instances
//! - **Tiered ([`TieredCache`])**: local in front of remote
//!
//! ## Cache Hierarchy
//!
//! ```text
//! GET  → Local ──miss──→ Remote            (no promotion back into Local)
//! SET  → Local ──ok────→ Remote            (write-through, no rollback)
//! DEL  → Local ──ok────→ Remote (KEYS + MULTI/DEL/EXEC)
//! ```

pub mod local;
pub mod remote;
pub mod tiered;

pub use local::{LocalCache, LocalEngine};
pub use remote::{RemoteCache, RemotePool};
pub use tiered::TieredCache;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheResult;

/// Operations every cache tier provides.
///
/// Keys are flat strings. Misses surface as [`CacheError::NotFound`].
///
/// [`CacheError::NotFound`]: crate::error::CacheError::NotFound
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get the raw bytes stored under `key`.
    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>>;

    /// Get and decode the value stored under `key` into `target`.
    async fn get<T>(&self, key: &str, target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned + Send;

    /// Store raw bytes under `key`, overwriting any previous value.
    async fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()>;

    /// Encode `value` and store it under `key`.
    async fn set<T>(&self, key: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove everything the tier holds.
    async fn purge(&self) -> CacheResult<()>;

    /// Release shared resources held by the tier.
    ///
    /// Idempotent. The default has nothing to release.
    async fn close(&self) {}
}
