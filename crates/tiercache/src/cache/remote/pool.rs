//! Shared connection pool for remote tiers.

use redis::aio::ConnectionLike;
use redis::{Cmd, Pipeline, RedisFuture, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::{RemoteCacheConfig, StoreMode};
use crate::error::{CacheError, CacheResult};
use crate::testing::{MemoryConnection, MemoryStore};

static GLOBAL_POOL: OnceLock<RemotePool> = OnceLock::new();

enum Backend {
    Cluster(deadpool_redis::cluster::Pool),
    Standalone(deadpool_redis::Pool),
    Memory(MemoryStore),
}

struct InitializedPool {
    backend: Backend,
    /// Seed nodes and mode the pool was built from; `None` for a memory store.
    origin: Option<(Vec<String>, StoreMode)>,
}

#[derive(Default)]
struct PoolState {
    pool: OnceCell<InitializedPool>,
    closed: AtomicBool,
}

/// Reference-counted handle to one physical connection pool.
///
/// Every clone shares the same pool. The pool is built by the first
/// successful [`initialize`](Self::initialize) call; later calls reuse it,
/// even when they carry different seed nodes. [`close`](Self::close) tears it
/// down once; a closed pool never reopens.
#[derive(Clone, Default)]
pub struct RemotePool {
    state: Arc<PoolState>,
}

impl RemotePool {
    /// A fresh, uninitialized pool owned by the caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide pool, shared by every caller of this function.
    pub fn global() -> Self {
        GLOBAL_POOL.get_or_init(RemotePool::new).clone()
    }

    /// A pool already initialized over an in-process store, for tests and
    /// diagnostics. Later `initialize` calls keep the store.
    pub fn memory(store: MemoryStore) -> Self {
        let initialized = InitializedPool {
            backend: Backend::Memory(store),
            origin: None,
        };
        Self {
            state: Arc::new(PoolState {
                pool: OnceCell::new_with(Some(initialized)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build the physical pool from `config` unless it already exists.
    ///
    /// Concurrent first callers converge on a single pool. A failed build
    /// leaves the pool uninitialized so a later call may retry.
    pub async fn initialize(&self, config: &RemoteCacheConfig) -> CacheResult<()> {
        if self.is_closed() {
            return Err(CacheError::connection("remote pool is closed"));
        }

        let initialized = self
            .state
            .pool
            .get_or_try_init(|| async { build(config) })
            .await?;

        if let Some((seed_nodes, mode)) = &initialized.origin {
            if *mode != config.mode || *seed_nodes != config.seed_nodes {
                tracing::warn!(
                    configured = ?config.seed_nodes,
                    active = ?seed_nodes,
                    "remote pool already initialized; ignoring differing seed nodes"
                );
            }
        }
        Ok(())
    }

    /// Acquire a connection. It returns to the pool when dropped.
    pub async fn connection(&self) -> CacheResult<PooledConnection> {
        if self.is_closed() {
            return Err(CacheError::connection("remote pool is closed"));
        }
        let initialized = self
            .state
            .pool
            .get()
            .ok_or_else(|| CacheError::connection("remote pool is not initialized"))?;

        Ok(match &initialized.backend {
            Backend::Cluster(pool) => PooledConnection::Cluster(pool.get().await?),
            Backend::Standalone(pool) => PooledConnection::Standalone(pool.get().await?),
            Backend::Memory(store) => PooledConnection::Memory(store.connection()),
        })
    }

    /// Close the pool. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(initialized) = self.state.pool.get() {
            match &initialized.backend {
                Backend::Cluster(pool) => pool.close(),
                Backend::Standalone(pool) => pool.close(),
                Backend::Memory(_) => {}
            }
        }
        tracing::info!("remote cache pool closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.pool.initialized()
    }

    /// Whether both handles refer to the same physical pool.
    pub fn same_pool(&self, other: &RemotePool) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for RemotePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePool")
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn build(config: &RemoteCacheConfig) -> CacheResult<InitializedPool> {
    let backend = match config.mode {
        StoreMode::Standalone => {
            let seed = config
                .seed_nodes
                .first()
                .ok_or_else(|| CacheError::config("remote.seed_nodes must not be empty"))?;
            let mut redis_config = deadpool_redis::Config::from_url(seed_url(seed, config.auth_token())?);
            redis_config.pool = Some(pool_config(config));
            let pool = redis_config
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .map_err(|e| CacheError::Connection(format!("failed to create Redis pool: {e}")))?;
            Backend::Standalone(pool)
        }
        StoreMode::Cluster => {
            let urls = config
                .seed_nodes
                .iter()
                .map(|seed| seed_url(seed, config.auth_token()))
                .collect::<CacheResult<Vec<_>>>()?;
            let mut cluster_config = deadpool_redis::cluster::Config::from_urls(urls);
            cluster_config.pool = Some(pool_config(config));
            let pool = cluster_config
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .map_err(|e| {
                    CacheError::Connection(format!("failed to create Redis cluster pool: {e}"))
                })?;
            Backend::Cluster(pool)
        }
    };

    tracing::info!(
        mode = ?config.mode,
        seed_nodes = ?config.seed_nodes,
        pool_size = config.pool_size,
        "remote cache pool created"
    );

    Ok(InitializedPool {
        backend,
        origin: Some((config.seed_nodes.clone(), config.mode)),
    })
}

fn pool_config(config: &RemoteCacheConfig) -> deadpool_redis::PoolConfig {
    let timeout = Some(config.connect_timeout());
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;
    pool_config
}

/// Normalize a seed node into a `redis://` URL carrying the auth token, so
/// every pooled connection authenticates when it is created.
fn seed_url(seed: &str, auth_token: Option<&str>) -> CacheResult<String> {
    let raw = if seed.contains("://") {
        seed.to_string()
    } else {
        format!("redis://{seed}")
    };
    let mut url =
        Url::parse(&raw).map_err(|e| CacheError::Config(format!("invalid seed node {seed}: {e}")))?;
    if let Some(token) = auth_token {
        url.set_password(Some(token))
            .map_err(|_| CacheError::Config(format!("seed node {seed} cannot carry a password")))?;
    }
    Ok(url.to_string())
}

/// A connection checked out of a [`RemotePool`].
pub enum PooledConnection {
    Cluster(deadpool_redis::cluster::Connection),
    Standalone(deadpool_redis::Connection),
    Memory(MemoryConnection),
}

impl ConnectionLike for PooledConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            PooledConnection::Cluster(conn) => conn.req_packed_command(cmd),
            PooledConnection::Standalone(conn) => conn.req_packed_command(cmd),
            PooledConnection::Memory(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            PooledConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
            PooledConnection::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            PooledConnection::Memory(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            PooledConnection::Cluster(conn) => conn.get_db(),
            PooledConnection::Standalone(conn) => conn.get_db(),
            PooledConnection::Memory(conn) => conn.get_db(),
        }
    }
}
