//! Logging bootstrap (added ambient stack, SPEC_FULL.md §1): an
//! `EnvFilter`-driven `tracing` subscriber installer, analogous to the
//! teacher's `hash_tracing::init`.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG` (defaulting to `info` when unset). Safe to call more than
/// once per process — later calls are no-ops, matching
/// `tracing::subscriber::set_global_default`'s own idempotence contract.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_ansi(true).try_init();
}
