//! Structured logging setup: an `EnvFilter` sourced from `RUST_LOG`
//! (falling back to a config-supplied default), with optional JSON
//! formatting for production deployments.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. Call once, at the top of
/// `main`, in every binary.
///
/// `filter_directive` seeds `EnvFilter` when `RUST_LOG` is unset;
/// `json` switches between JSON output (suitable for log aggregation) and
/// human-readable output (convenient for local runs).
pub fn init(filter_directive: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive.to_string()));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}
