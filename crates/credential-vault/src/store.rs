//! Persistence backends for the serialized vault.

use crate::VaultResult;
use campus_config_and_utils::atomic_write;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Where the serialized vault lives.
///
/// `save` must replace the previous contents atomically: after a crash the
/// store holds either the old or the new bytes.
pub trait VaultStore: Send + Sync {
    /// Read the stored bytes, `None` when nothing was saved yet.
    fn load(&self) -> VaultResult<Option<Vec<u8>>>;

    fn save(&self, bytes: &[u8]) -> VaultResult<()>;
}

/// Vault file on disk, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    path: PathBuf,
}

impl FileVaultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VaultStore for FileVaultStore {
    fn load(&self) -> VaultResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> VaultResult<()> {
        atomic_write(&self.path, bytes)?;
        Ok(())
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryVaultStore {
    data: Mutex<Option<Vec<u8>>>,
    fail_saves: Mutex<bool>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last saved bytes.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }

    /// Make subsequent saves fail with an IO error.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }
}

impl VaultStore for MemoryVaultStore {
    fn load(&self) -> VaultResult<Option<Vec<u8>>> {
        Ok(self.data.lock().clone())
    }

    fn save(&self, bytes: &[u8]) -> VaultResult<()> {
        if *self.fail_saves.lock() {
            return Err(std::io::Error::other("simulated write failure").into());
        }
        *self.data.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = FileVaultStore::new(dir.path().join("accounts.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileVaultStore::new(dir.path().join("nested").join("accounts.json"));

        store.save(b"{\"version\":1}").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"{\"version\":1}");
    }

    #[test]
    fn test_memory_store_failure_keeps_previous_bytes() {
        let store = MemoryVaultStore::new();
        store.save(b"old").unwrap();

        store.set_fail_saves(true);
        assert!(store.save(b"new").is_err());
        assert_eq!(store.contents().unwrap(), b"old");
    }
}
