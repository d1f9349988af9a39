//! Tracing bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` wins over the configured filter. Calling this twice is a
/// no-op, so tests and embedders can call it freely.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        tracing::debug!(filter = %config.filter, json = config.json, "tracing initialized");
    }
}
