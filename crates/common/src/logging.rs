//! Logging setup for VRRP binaries.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels.
/// Default level is INFO.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter("info"))
        .init();
}

/// Initialize tracing with JSON formatting, one object per event.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(filter("info"))
        .init();
}

/// Initialize tracing for tests. Safe to call more than once.
pub fn init_test() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter("debug"))
        .try_init();
}
