//! Log output for cache spans and events.
//!
//! The filter sits behind a reload layer so the level can be changed while
//! caches are running.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

/// Install a registry with a reloadable filter and a fmt layer.
///
/// `RUST_LOG` wins over `level` when it parses. Only the first call installs
/// anything; returns whether this call did.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (layer, handle) = reload::Layer::new(filter);
    if FILTER.set(handle).is_err() {
        return false;
    }

    tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Swap the active filter, e.g. `"tiercache=debug"`.
///
/// Returns `false` when tracing was not installed through [`init_tracing`].
pub fn set_log_level(level: &str) -> bool {
    FILTER
        .get()
        .is_some_and(|handle| handle.modify(|filter| *filter = EnvFilter::new(level)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("info");
        assert!(!init_tracing("debug"));
        assert!(set_log_level("tiercache=trace"));
    }
}
