//! Encrypted at-rest store for the credentials of every managed account.
//!
//! Account metadata (id, display name, kind, device identifier, trust flag)
//! is stored in the clear because it is needed before unlock. Secrets are
//! sealed as one blob under a key derived from a single master password.
//! Encryption covers the whole secret table or nothing.

mod artifacts;
mod crypto;
mod error;
mod models;
mod store;
mod vault;

#[cfg(test)]
mod tests;

pub use artifacts::{AccountArtifacts, DataDirArtifacts, NoArtifacts};
pub use crypto::KdfParams;
pub use error::{VaultError, VaultResult};
pub use models::{
    generate_device_id, is_valid_device_id, Account, AccountId, AccountKind, Credential,
    NewAccount, DEVICE_ID_LEN,
};
pub use store::{FileVaultStore, MemoryVaultStore, VaultStore};
pub use vault::{CredentialVault, VaultState, VAULT_FORMAT_VERSION};
