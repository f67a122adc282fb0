//! Process-wide tracing setup shared by every brandkit binary.

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
