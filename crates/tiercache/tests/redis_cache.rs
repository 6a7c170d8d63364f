//! Integration tests against a real Redis server.
//!
//! Tests use testcontainers to spin up a standalone Redis instance, so they
//! need Docker. Run them with `cargo test --features redis-tests`.

#![cfg(feature = "redis-tests")]

use std::sync::Arc;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache::encoder::{JsonEncoder, MessagePackEncoder};
use tiercache::{
    Cache, CounterMetrics, NoopMetrics, RemoteCache, RemoteCacheConfig, RemotePool, StoreMode,
    TieredCache, TieredCacheConfig, TieredMetrics,
};
use tokio::sync::{Mutex, OnceCell};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

// Tests purge the whole server, so they run one at a time
static SERIAL: Mutex<()> = Mutex::const_new(());

/// Get or create the shared Redis container
async fn get_redis_seed() -> String {
    let (_, seed) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let seed = format!("127.0.0.1:{}", host_port);

            (container, seed)
        })
        .await;

    seed.clone()
}

async fn remote_config() -> RemoteCacheConfig {
    RemoteCacheConfig {
        seed_nodes: vec![get_redis_seed().await],
        mode: StoreMode::Standalone,
        pool_size: 4,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_remote_round_trip_and_fuzzy_delete() {
    let _guard = SERIAL.lock().await;
    let metrics = CounterMetrics::new();
    let cache = RemoteCache::connect(
        &remote_config().await,
        RemotePool::new(),
        MessagePackEncoder,
        metrics.clone(),
    )
    .await
    .expect("connect to redis");
    cache.purge().await.unwrap();

    cache.set("foo1", "a").await.unwrap();
    cache.set("foo2", "b").await.unwrap();
    cache.set("bar", "c").await.unwrap();

    let mut value = String::new();
    cache.get("foo1", &mut value).await.unwrap();
    assert_eq!(value, "a");

    cache.delete("foo*").await.unwrap();
    assert!(cache.get_bytes("foo1").await.unwrap_err().is_not_found());
    assert!(cache.get_bytes("foo2").await.unwrap_err().is_not_found());
    assert!(cache.get_bytes("bar").await.is_ok());

    cache.delete("zzz*").await.unwrap();
    assert_eq!(cache.delete_keys(&["bar", "baz"]).await.unwrap(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sets, 3);
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.delete_hits, 2);
    assert_eq!(snapshot.delete_misses, 1);

    cache.close().await;
}

#[tokio::test]
async fn test_shared_pool_across_caches() {
    let _guard = SERIAL.lock().await;
    let config = remote_config().await;
    let pool = RemotePool::new();

    let msgpack = RemoteCache::connect(&config, pool.clone(), MessagePackEncoder, NoopMetrics::shared())
        .await
        .expect("connect to redis");
    let json = RemoteCache::connect(&config, pool.clone(), JsonEncoder, NoopMetrics::shared())
        .await
        .expect("connect to redis");
    assert!(msgpack.pool().same_pool(json.pool()));

    json.set("shared:json", &vec![1, 2, 3]).await.unwrap();
    assert_eq!(msgpack.get_bytes("shared:json").await.unwrap(), b"[1,2,3]");

    msgpack.close().await;
    assert!(json.get_bytes("shared:json").await.unwrap_err().is_connection());
}

#[tokio::test]
async fn test_tiered_cache_against_redis() {
    let _guard = SERIAL.lock().await;
    let config = TieredCacheConfig {
        remote: remote_config().await,
        ..Default::default()
    };
    let metrics = CounterMetrics::new();
    let cache = Arc::new(
        TieredCache::from_config(
            &config,
            RemotePool::new(),
            MessagePackEncoder,
            TieredMetrics {
                tiered: metrics.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("build tiered cache"),
    );
    cache.purge().await.unwrap();

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set(&format!("tiered:{i}"), &i).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..8u32 {
        let mut value = 0u32;
        cache.remote().get(&format!("tiered:{i}"), &mut value).await.unwrap();
        assert_eq!(value, i);
    }
    assert_eq!(cache.local().len(), 8);
    assert_eq!(metrics.snapshot().sets, 8);

    cache.purge().await.unwrap();
    assert!(cache.local().is_empty());
    assert!(cache.remote().get_bytes("tiered:0").await.unwrap_err().is_not_found());

    cache.close().await;
}
