//! Test doubles for code built on top of the cache contract.
//!
//! - [`MockCache`]: a whole tier in a map
//! - [`MemoryStore`]: a Redis stand-in for the remote tier, see
//!   [`RemotePool::memory`](crate::RemotePool::memory)
//!
//! [`CounterMetrics`](crate::metrics::CounterMetrics) covers the metrics side.

mod memory_store;

pub use memory_store::{MemoryConnection, MemoryStore, glob_match};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::Cache;
use crate::encoder::{CacheEncoder, MessagePackEncoder};
use crate::error::{CacheError, CacheResult};

/// In-memory [`Cache`] with switchable write failures.
///
/// Deleting an absent key fails with [`CacheError::NotFound`], like the local
/// tier. While `fail_writes` is on, every write returns a connection error
/// and leaves the map untouched.
#[derive(Debug, Default)]
pub struct MockCache<E = MessagePackEncoder> {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    encoder: E,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl<E: CacheEncoder> MockCache<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            encoder,
            fail_writes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn insert(&self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.lock().insert(key.into(), value);
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CacheError::connection("mock cache rejects writes"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<E: CacheEncoder> Cache for MockCache<E> {
    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.value(key).ok_or_else(|| CacheError::not_found(key))
    }

    async fn get<T>(&self, key: &str, target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned + Send,
    {
        let data = self.get_bytes(key).await?;
        self.encoder.decode(&data, target)
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.check_writable()?;
        self.insert(key, value.to_vec());
        Ok(())
    }

    async fn set<T>(&self, key: &str, value: &T) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let encoded = self.encoder.encode(value)?;
        self.set_bytes(key, &encoded).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_writable()?;
        match self.entries.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(CacheError::not_found(key)),
        }
    }

    async fn purge(&self) -> CacheResult<()> {
        self.check_writable()?;
        self.entries.lock().clear();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
