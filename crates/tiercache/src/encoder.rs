//! Value encoding for cached entries.
//!
//! Both tiers store opaque bytes; the encoder decides the format. Share one
//! encoder type between the local and remote tier of a [`TieredCache`] so
//! bytes written by one can be read by the other.
//!
//! [`TieredCache`]: crate::cache::TieredCache

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheError, CacheResult};

/// Encodes and decodes values stored in a cache.
pub trait CacheEncoder: Send + Sync {
    /// Serialize `value` into bytes.
    fn encode<T>(&self, value: &T) -> CacheResult<Vec<u8>>
    where
        T: Serialize + ?Sized;

    /// Deserialize `cached` and write the result into `target`.
    ///
    /// `target` is only written when decoding succeeds.
    fn decode<T>(&self, cached: &[u8], target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned;
}

/// MessagePack encoding via `rmp-serde`.
///
/// Structs are written as maps keyed by field name, so adding an optional
/// field to a cached type does not invalidate existing entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackEncoder;

impl CacheEncoder for MessagePackEncoder {
    fn encode<T>(&self, value: &T) -> CacheResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        rmp_serde::to_vec_named(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode<T>(&self, cached: &[u8], target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned,
    {
        *target = rmp_serde::from_slice(cached).map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(())
    }
}

/// JSON encoding via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl CacheEncoder for JsonEncoder {
    fn encode<T>(&self, value: &T) -> CacheResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode<T>(&self, cached: &[u8], target: &mut T) -> CacheResult<()>
    where
        T: DeserializeOwned,
    {
        *target = serde_json::from_slice(cached).map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(())
    }
}
