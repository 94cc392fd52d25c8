//! Shared fixtures for vault tests.

use crate::{
    AccountArtifacts, AccountKind, CredentialVault, MemoryVaultStore, NewAccount, NoArtifacts,
};
use campus_config_and_utils::KdfSettings;
use std::sync::Arc;

/// Cheap Argon2 parameters so tests stay fast.
pub fn test_kdf() -> KdfSettings {
    KdfSettings {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

pub struct VaultHarness {
    pub store: Arc<MemoryVaultStore>,
    pub vault: CredentialVault,
}

impl VaultHarness {
    pub fn new() -> Self {
        Self::with_artifacts(Arc::new(NoArtifacts))
    }

    pub fn with_artifacts(artifacts: Arc<dyn AccountArtifacts>) -> Self {
        let store = Arc::new(MemoryVaultStore::new());
        let vault = CredentialVault::open(store.clone(), artifacts, test_kdf()).unwrap();
        Self { store, vault }
    }

    /// Open a second vault instance over the same persisted bytes.
    pub fn reopen(&self) -> CredentialVault {
        CredentialVault::open(self.store.clone(), Arc::new(NoArtifacts), test_kdf()).unwrap()
    }

    pub fn persisted_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.store.contents().unwrap()).unwrap()
    }
}

pub fn undergrad(username: &str) -> NewAccount {
    NewAccount::new(username, AccountKind::Undergraduate)
}
