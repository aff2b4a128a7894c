//! Tracing and logging setup shared by the storefront crates.

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize logging for tests: human-readable, captured by the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber configuration (filters, formatters).
pub mod tracing;
