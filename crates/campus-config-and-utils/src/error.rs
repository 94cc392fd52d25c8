//! Errors raised while loading configuration or touching the base directory.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A config value failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// An identity provider or gateway URL did not parse
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory to place `~/.campus-toolbox` in
    #[error("Cannot resolve base directory: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
