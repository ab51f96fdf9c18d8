//! Structured logging infrastructure for the identity engine.
//!
//! Centralized `tracing` initialization with plain or JSON output. Log level
//! comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with human-readable output.
///
/// # Example
/// ```no_run
/// use osaurus_core::logging;
///
/// logging::init();
/// tracing::info!("Identity service started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for log aggregation.
///
/// # Example
/// ```no_run
/// use osaurus_core::logging;
///
/// logging::init_json();
/// tracing::info!(component = "validator", "Validator published");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Install a test-writer subscriber, ignoring the error when one is already set.
///
/// Test binaries share one global subscriber, so every test may call this.
pub fn try_init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
