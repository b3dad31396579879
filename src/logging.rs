//! Diagnostic tracing for debugging envops itself.
//!
//! Reports, plans, and listings are product output and go to stdout;
//! everything emitted through `tracing` goes to stderr and is filtered by
//! `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`. Output is compact and goes to
/// stderr. Calling this twice is a no-op.
///
/// ```bash
/// RUST_LOG=envops=debug envops sync
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
