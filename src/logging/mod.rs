//! Structured logging init via `tracing`'s own subscriber — no sibling
//! logger process in this deployment shape, just per-module targets and
//! JSON or plain-text output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber. Idempotent: subsequent calls
/// after the first are no-ops (the underlying `set_global_default` would
/// otherwise panic in tests that init more than once).
pub fn init_tracing(json: bool) {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry.with(fmt::layer().json()).init();
        } else {
            registry.with(fmt::layer()).init();
        }
    });
}
