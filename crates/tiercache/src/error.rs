use std::fmt;

use thiserror::Error;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl CacheError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// A miss: the tier simply does not hold the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Pool, network, or topology failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        let auth_code = matches!(e.code(), Some("WRONGPASS" | "NOAUTH"));
        if e.kind() == redis::ErrorKind::AuthenticationFailed || auth_code {
            Self::Auth(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        match e {
            deadpool_redis::PoolError::Backend(inner) => inner.into(),
            other => Self::Connection(format!("failed to get pooled connection: {other}")),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Construction that completed only partway.
///
/// The cache value is usable (operations fail until the store becomes
/// reachable), so it is handed back alongside the error for the caller to
/// inspect or retry.
pub struct StartupError<C> {
    pub cache: C,
    pub error: CacheError,
}

impl<C> StartupError<C> {
    pub fn into_parts(self) -> (C, CacheError) {
        (self.cache, self.error)
    }
}

impl<C> fmt::Debug for StartupError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for StartupError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache started with errors: {}", self.error)
    }
}

impl<C> std::error::Error for StartupError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<C> From<StartupError<C>> for CacheError {
    fn from(e: StartupError<C>) -> Self {
        e.error
    }
}
