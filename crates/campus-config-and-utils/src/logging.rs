//! Logging initialization.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to
//! `~/.campus-toolbox/logs/campus.jsonl`. Setting `CAMPUS_LOG_STDERR=1`
//! mirrors events to stderr as well.

use std::path::PathBuf;

/// Initialize the logging system.
///
/// * `level` - Default log level (trace, debug, info, warn, error), used
///   when `RUST_LOG` is unset.
/// * `log_path` - Override for the JSONL file location.
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    observability::init_with_config(observability::LogConfig {
        service_name: "campus-toolbox".into(),
        default_level: parse_level(level).to_string().to_ascii_lowercase(),
        log_path,
        also_stderr: std::env::var("CAMPUS_LOG_STDERR").is_ok_and(|v| v != "0"),
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
