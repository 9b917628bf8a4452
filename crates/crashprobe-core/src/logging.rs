//! Subscriber setup for binaries and tests embedding the harness.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "crashprobe=info,warn";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Returns false if a subscriber was already installed; the existing one
/// stays in place.
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Like [`init`], with `fallback` used when `RUST_LOG` is unset or invalid.
pub fn init_with(fallback: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(fallback))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Subscriber for test binaries: output goes through the test harness capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
        .with_test_writer()
        .try_init();
}

fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
