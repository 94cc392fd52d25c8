//! Core types, configuration, and utilities for the campus toolbox.

mod config;
mod error;
mod fs;
mod logging;
mod paths;

pub use config::{
    Config, IdentityProviderConfig, KdfSettings, RetrySettings, RoutePreference,
    SessionSettings, DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use fs::atomic_write;
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
