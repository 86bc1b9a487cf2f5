//! Logging setup shared by storefront binaries and test harnesses.

/// JSON `tracing` subscriber configuration.
pub mod tracing;

/// Install the process-wide subscriber with the default `info` filter.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    self::tracing::init_with_default_filter("info");
}
