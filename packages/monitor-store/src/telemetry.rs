//! Logging setup
//!
//! The library only emits `tracing` events; the composing process decides
//! whether to install a subscriber. `init_tracing` is the default one.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Result, StoreError};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"monitor_store=info"`)
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| StoreError::config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| StoreError::config(format!("Logger already initialized: {}", e)))
}
