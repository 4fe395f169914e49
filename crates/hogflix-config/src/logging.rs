//! Logging initialization.
//!
//! Thin wrapper over the observability package so embedding applications
//! configure logging from the same [`Config`](crate::Config) they load.

use crate::Paths;

/// Initialize logging for a Hogflix service.
///
/// Writes JSONL to `<paths>/logs/dev.jsonl`; `RUST_LOG` overrides `level`.
/// Set `HOGFLIX_LOG_STDERR=1` to mirror output to stderr.
pub fn init_logging(service_name: &str, level: &str, paths: &Paths) {
    let also_stderr = std::env::var("HOGFLIX_LOG_STDERR")
        .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.dev_log_file()),
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level, defaulting to INFO.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
