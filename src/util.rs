//! Process setup helpers shared by the binaries, plus test fixtures

use crate::config::RUST_LOG;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// built-in default filter
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUST_LOG));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
