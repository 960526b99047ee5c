//! Tracing bootstrap for binaries and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the embedding application's choice. This helper wires the conventional
//! fmt subscriber with an env-filter (`RUST_LOG`) for hosts that do not have
//! their own telemetry stack.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; subsequent calls are no-ops. Defaults to
/// `info` for this crate when `RUST_LOG` is unset.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keywordsmith=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
