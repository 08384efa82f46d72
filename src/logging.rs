//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

use crate::types::{CbtreeError, Result};

/// Installs a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (for example `"cbtree=debug"`)
/// is used. Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|_| CbtreeError::Invalid("unparseable log filter"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| CbtreeError::Invalid("tracing subscriber already installed"))
}
