//! Tracing subscriber installation for binaries, tests, and examples that
//! embed this crate.
//!
//! Library code never installs its own subscriber — it only emits
//! `tracing::{debug,info,warn,error}!` events and spans. This module is a
//! scaled-down version of `LoggerImpl::init`: no file rotation
//! (`tracing-appender`) and no secret-scrubbing layer, since this crate
//! never logs full agent output bodies at `info` level, only agent names,
//! event types, and usage metrics.

use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install a `tracing_subscriber::fmt` subscriber as the global default,
/// honoring `RUST_LOG` and falling back to [`DEFAULT_FILTER`].
///
/// Safe to call more than once; subsequent calls are no-ops (matching
/// `tracing_subscriber`'s own `try_init` semantics).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

/// Install a subscriber with an explicit filter directive, ignoring
/// `RUST_LOG`. Useful for tests that want deterministic verbosity.
pub fn init_tracing_with_filter(directive: &str) {
    let filter = EnvFilter::new(directive);
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
