//! # Observability
//!
//! Structured logging for the campus toolbox.
//!
//! Every binary and library in the workspace logs through standard `tracing`
//! macros. The binary calls [`init_with_config`] once at startup;
//! library crates never install a subscriber themselves.
//!
//! ## Dev Mode
//!
//! With the `dev` feature (default) all events are written as JSONL to
//! `~/.campus-toolbox/logs/campus.jsonl`:
//!
//! - `tail -f ~/.campus-toolbox/logs/campus.jsonl | jq` for pretty JSON
//! - `lnav ~/.campus-toolbox/logs/campus.jsonl` for interactive exploration
//!
//! Field values whose names look like secrets (passwords, verification codes,
//! tokens, cookies) are replaced with `[REDACTED]` before they are written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "campus-toolbox".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

pub use json_layer::{is_secret_field, LogEntry, REDACTED};

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.campus-toolbox/logs/campus.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with custom configuration.
///
/// Installing a second global subscriber is a no-op, so tests and embedders
/// may call this more than once.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}
