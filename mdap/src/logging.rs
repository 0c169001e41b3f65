//! Diagnostic tracing for the engine.
//!
//! Run progress (node transitions, consensus results, red-flag verdicts) is
//! reported through `tracing`. The durable record of a run is the snapshot
//! written by [`crate::io::state_store`], which is unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Output: stderr, compact.
///
/// # Example
/// ```bash
/// RUST_LOG=mdap=info mdap run "Write a changelog generator"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
