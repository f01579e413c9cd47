use tracing_subscriber::{fmt, EnvFilter};

/// Human-readable logging to stderr.
///
/// `RUST_LOG` wins over `default_level` (e.g. "info", "bk_core=debug,warn").
/// Later calls are no-ops, so tests may call it freely.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, "logging initialised (human-readable)");
}

/// JSON-lines logging to stderr, one object per event.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_current_span(false)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, "logging initialised (json)");
}
