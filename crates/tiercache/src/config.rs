use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Configuration for a [`TieredCache`](crate::cache::TieredCache)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    #[serde(default)]
    pub remote: RemoteCacheConfig,
    #[serde(default)]
    pub local: LocalCacheConfig,
    /// Enable tracing on the tiered cache
    #[serde(default = "default_tracing_enabled")]
    pub tracing_enabled: bool,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            remote: RemoteCacheConfig::default(),
            local: LocalCacheConfig::default(),
            tracing_enabled: default_tracing_enabled(),
        }
    }
}

impl TieredCacheConfig {
    pub fn validate(&self) -> CacheResult<()> {
        self.local.validate()?;
        self.remote.validate()
    }
}

/// How the remote tier reaches its store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Redis Cluster; seed nodes are used to discover the topology
    #[default]
    Cluster,
    /// A single Redis node (the first seed node)
    Standalone,
}

/// Remote (Redis) tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Seed nodes as `host:port` or `redis://host:port`
    #[serde(default = "default_seed_nodes")]
    pub seed_nodes: Vec<String>,

    /// Auth token sent with AUTH, if any
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub mode: StoreMode,

    /// Enable tracing on the remote cache
    #[serde(default = "default_tracing_enabled")]
    pub tracing_enabled: bool,
}

fn default_seed_nodes() -> Vec<String> {
    (7000..=7005).map(|port| format!("127.0.0.1:{port}")).collect()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_pool_size() -> usize {
    10
}

fn default_tracing_enabled() -> bool {
    true
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            seed_nodes: default_seed_nodes(),
            auth_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_size: default_pool_size(),
            mode: StoreMode::default(),
            tracing_enabled: default_tracing_enabled(),
        }
    }
}

impl RemoteCacheConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The configured token, treating an empty string as absent.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.seed_nodes.is_empty() {
            return Err(CacheError::config("remote.seed_nodes must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(CacheError::config("remote.pool_size must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(CacheError::config("remote.connect_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Local (in-process) tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    /// How frequently expired entries are swept, in seconds (0 disables the sweeper)
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Entry time-to-live in seconds (0 means entries never expire)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Number of shards. 0 lets the engine decide; otherwise a power of two >= 2.
    #[serde(default)]
    pub shards: usize,

    /// Enable tracing on the local cache
    #[serde(default = "default_tracing_enabled")]
    pub tracing_enabled: bool,
}

fn default_eviction_interval_secs() -> u64 {
    5
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            eviction_interval_secs: default_eviction_interval_secs(),
            ttl_secs: default_ttl_secs(),
            shards: 0,
            tracing_enabled: default_tracing_enabled(),
        }
    }
}

impl LocalCacheConfig {
    pub fn eviction_interval(&self) -> Option<Duration> {
        (self.eviction_interval_secs > 0).then(|| Duration::from_secs(self.eviction_interval_secs))
    }

    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.shards != 0 && (self.shards < 2 || !self.shards.is_power_of_two()) {
            return Err(CacheError::Config(format!(
                "local.shards must be a power of 2 - {} is invalid",
                self.shards
            )));
        }
        Ok(())
    }
}

pub mod loader {
    use super::TieredCacheConfig;
    use crate::error::{CacheError, CacheResult};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load configuration from an optional TOML file, then apply environment
    /// overrides, e.g. `TIERCACHE__LOCAL__SHARDS=16`.
    pub fn load_config(path: Option<&str>) -> CacheResult<TieredCacheConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("tiercache.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("remote.seed_nodes"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::Config(format!("config build error: {e}")))?;
        let merged: TieredCacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::Config(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

pub use loader::load_config;
