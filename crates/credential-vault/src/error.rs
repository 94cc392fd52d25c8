//! Vault error types.

use crate::AccountId;
use thiserror::Error;

/// Error type for vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The master password did not decrypt the envelope
    #[error("wrong master password")]
    WrongPassword,

    /// Nothing has been stored yet
    #[error("vault is empty")]
    VaultEmpty,

    /// Encryption is enabled and the vault has not been unlocked
    #[error("vault is locked")]
    VaultLocked,

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Operation needs an encrypted vault
    #[error("vault encryption is not enabled")]
    EncryptionDisabled,

    /// Operation needs a plaintext vault
    #[error("vault encryption is already enabled")]
    EncryptionEnabled,

    #[error("a master password is required")]
    PasswordRequired,

    #[error("invalid device identifier: {0}")]
    InvalidDeviceId(String),

    /// Persisted vault could not be interpreted
    #[error("corrupt vault: {0}")]
    Corrupt(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;
