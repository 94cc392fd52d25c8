//! Errors raised while wiring the application context.

use campus_auth::AuthError;
use campus_config_and_utils::CoreError;
use credential_vault::VaultError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// The reachability probe client could not be built
    #[error("Probe setup failed: {0}")]
    Probe(String),
}

pub type ContextResult<T> = Result<T, ContextError>;
