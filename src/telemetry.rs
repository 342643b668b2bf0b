//! Tracing setup for embedding binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Respects `RUST_LOG`, defaulting to `steward=info,warn`. With
/// `json` set, events are emitted as JSON lines for log shippers.
/// Calling this twice is a no-op.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("steward=info,warn"));

    let builder = fmt().with_env_filter(filter).with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber was already installed");
    }
}
