//! Integration tests for the two-tier cache over the in-process store.
//!
//! The remote tier runs against `MemoryStore`, which speaks the same
//! command set as Redis, so no external services are needed.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tiercache::testing::MemoryStore;
use tiercache::encoder::MessagePackEncoder;
use tiercache::{
    Cache, CacheError, CounterMetrics, LocalCache, LocalCacheConfig, RemoteCache,
    RemoteCacheConfig, RemotePool, StoreMode, TieredCache, TieredCacheConfig, TieredMetrics,
    load_config,
};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct ParkingSpot {
    id: u64,
    zone: String,
    covered: bool,
}

fn spot(id: u64) -> ParkingSpot {
    ParkingSpot {
        id,
        zone: format!("zone-{}", id % 3),
        covered: id % 2 == 0,
    }
}

struct Harness {
    cache: TieredCache<LocalCache, RemoteCache>,
    store: MemoryStore,
    pool: RemotePool,
    metrics: Arc<CounterMetrics>,
}

async fn harness() -> Harness {
    let store = MemoryStore::new();
    let pool = RemotePool::memory(store.clone());
    let metrics = CounterMetrics::new();

    let config = TieredCacheConfig::default();
    let cache = TieredCache::from_config(
        &config,
        pool.clone(),
        MessagePackEncoder,
        TieredMetrics {
            tiered: metrics.clone(),
            ..Default::default()
        },
    )
    .await
    .expect("build tiered cache");

    Harness {
        cache,
        store,
        pool,
        metrics,
    }
}

#[tokio::test]
async fn test_round_trip_through_both_tiers() {
    let h = harness().await;

    h.cache.set("spot:1", &spot(1)).await.unwrap();
    assert!(h.store.contains("spot:1"));
    assert_eq!(h.cache.local().len(), 1);

    let mut target = ParkingSpot::default();
    h.cache.get("spot:1", &mut target).await.unwrap();
    assert_eq!(target, spot(1));

    // Both tiers hold the same encoded bytes
    let local = h.cache.local().get_bytes("spot:1").await.unwrap();
    assert_eq!(Some(local), h.store.value("spot:1"));

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sets, 1);
    assert_eq!(snapshot.hits, 1);
}

#[tokio::test]
async fn test_absent_key_records_one_miss() {
    let h = harness().await;

    let mut target = ParkingSpot::default();
    let err = h.cache.get("spot:missing", &mut target).await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound { .. }));
    assert_eq!(target, ParkingSpot::default());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, 0);
}

#[tokio::test]
async fn test_remote_only_value_is_not_promoted() {
    let h = harness().await;
    h.cache.remote().set("spot:2", &spot(2)).await.unwrap();

    let mut target = ParkingSpot::default();
    h.cache.get("spot:2", &mut target).await.unwrap();
    assert_eq!(target, spot(2));
    assert!(h.cache.local().get_bytes("spot:2").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_remote_failure_leaves_local_write() {
    let h = harness().await;
    h.pool.close();

    let err = h.cache.set("spot:3", &spot(3)).await.unwrap_err();
    assert!(err.is_connection());

    // The local write is not rolled back
    let mut target = ParkingSpot::default();
    h.cache.local().get("spot:3", &mut target).await.unwrap();
    assert_eq!(target, spot(3));
    assert!(!h.store.contains("spot:3"));
    assert_eq!(h.metrics.snapshot().set_collisions, 1);
}

#[tokio::test]
async fn test_delete_removes_pattern_from_remote() {
    let h = harness().await;
    h.store.insert("spot:10", "x");
    h.store.insert("spot:11", "y");
    h.store.insert("zone:1", "z");
    h.cache.set_bytes("spot:1", b"v").await.unwrap();

    // Local deletes the exact key, remote treats it as a pattern
    h.cache.delete("spot:1*").await.unwrap_err();
    assert!(h.store.contains("spot:10"));

    h.cache.delete("spot:1").await.unwrap();
    assert!(!h.store.contains("spot:1"));
    assert!(h.store.contains("spot:10"));

    h.cache.remote().delete("spot:*").await.unwrap();
    assert_eq!(h.store.keys(), vec!["zone:1".to_string()]);
}

#[tokio::test]
async fn test_purge_empties_both_tiers() {
    let h = harness().await;
    for id in 0..5 {
        h.cache.set(&format!("spot:{id}"), &spot(id)).await.unwrap();
    }

    h.cache.purge().await.unwrap();
    assert!(h.cache.local().is_empty());
    assert!(h.store.is_empty());

    let mut target = ParkingSpot::default();
    assert!(h.cache.local().get("spot:0", &mut target).await.is_err());
    assert!(h.cache.remote().get("spot:0", &mut target).await.is_err());
    assert_eq!(h.metrics.snapshot().purge_hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_leave_one_value_per_tier() {
    let h = harness().await;
    let cache = Arc::new(h.cache);

    let handles: Vec<_> = (0..16u64)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set("spot:contended", &spot(i % 2)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut local = ParkingSpot::default();
    cache.local().get("spot:contended", &mut local).await.unwrap();
    let mut remote = ParkingSpot::default();
    cache.remote().get("spot:contended", &mut remote).await.unwrap();
    assert!(local == spot(0) || local == spot(1));
    assert!(remote == spot(0) || remote == spot(1));
}

#[tokio::test]
async fn test_close_shuts_shared_pool() {
    let h = harness().await;
    let other = RemoteCache::connect(
        &RemoteCacheConfig::default(),
        h.pool.clone(),
        MessagePackEncoder,
        CounterMetrics::new(),
    )
    .await
    .map_err(|e| e.error)
    .unwrap();

    h.cache.close().await;
    h.cache.close().await;
    assert!(h.pool.is_closed());
    assert!(other.get_bytes("k").await.unwrap_err().is_connection());

    // The local tier keeps working
    h.cache.local().set_bytes("k", b"v").await.unwrap();
}

#[tokio::test]
async fn test_invalid_shard_count_rejected() {
    for shards in [3, 5, 12] {
        let config = LocalCacheConfig {
            shards,
            ..Default::default()
        };
        let err = LocalCache::new(&config, MessagePackEncoder, CounterMetrics::new())
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Config(_)));
    }
}

// Config loading reads process environment, so all of it lives in one test.
#[test]
fn test_load_config() {
    let defaults = load_config(Some("/nonexistent/tiercache.toml")).unwrap();
    assert_eq!(defaults.remote.seed_nodes.len(), 6);
    assert_eq!(defaults.remote.mode, StoreMode::Cluster);
    assert_eq!(defaults.local.ttl_secs, 3600);

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
tracing_enabled = false

[remote]
seed_nodes = ["10.1.0.1:7000", "10.1.0.2:7000"]
mode = "standalone"
pool_size = 4

[local]
ttl_secs = 120
shards = 8
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = load_config(Some(&path)).unwrap();
    assert!(!config.tracing_enabled);
    assert_eq!(config.remote.seed_nodes, vec!["10.1.0.1:7000", "10.1.0.2:7000"]);
    assert_eq!(config.remote.mode, StoreMode::Standalone);
    assert_eq!(config.remote.pool_size, 4);
    assert_eq!(config.remote.connect_timeout_ms, 5000);
    assert_eq!(config.local.ttl_secs, 120);
    assert_eq!(config.local.shards, 8);
    assert_eq!(config.local.eviction_interval_secs, 5);

    // SAFETY: no other test in this binary reads the environment
    unsafe { std::env::set_var("TIERCACHE__LOCAL__SHARDS", "7") };
    let result = load_config(Some(&path));
    unsafe { std::env::remove_var("TIERCACHE__LOCAL__SHARDS") };
    assert!(matches!(result, Err(CacheError::Config(_))));
}
