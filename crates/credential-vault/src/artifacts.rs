//! Cached per-account data that must disappear with the account.

use crate::AccountId;
use std::io;
use std::path::PathBuf;

/// Removes whatever an account left behind outside the vault.
pub trait AccountArtifacts: Send + Sync {
    /// Delete all artifacts of `account_id`. Succeeds when there are none.
    fn purge(&self, account_id: &AccountId) -> io::Result<()>;
}

/// Artifacts stored under `<root>/<account_id>/`.
#[derive(Debug, Clone)]
pub struct DataDirArtifacts {
    root: PathBuf,
}

impl DataDirArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, account_id: &AccountId) -> PathBuf {
        self.root.join(account_id.as_str())
    }
}

impl AccountArtifacts for DataDirArtifacts {
    fn purge(&self, account_id: &AccountId) -> io::Result<()> {
        let id = account_id.as_str();
        if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "account id is not a plain directory name",
            ));
        }
        match std::fs::remove_dir_all(self.dir_for(account_id)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// No cached data at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtifacts;

impl AccountArtifacts for NoArtifacts {
    fn purge(&self, _account_id: &AccountId) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_purge_removes_account_dir_only() {
        let dir = tempdir().unwrap();
        let artifacts = DataDirArtifacts::new(dir.path());
        let a = AccountId::from("a");
        let b = AccountId::from("b");
        std::fs::create_dir_all(artifacts.dir_for(&a).join("schedule")).unwrap();
        std::fs::create_dir_all(artifacts.dir_for(&b)).unwrap();

        artifacts.purge(&a).unwrap();

        assert!(!artifacts.dir_for(&a).exists());
        assert!(artifacts.dir_for(&b).exists());
    }

    #[test]
    fn test_purge_missing_dir_is_ok() {
        let dir = tempdir().unwrap();
        let artifacts = DataDirArtifacts::new(dir.path());
        artifacts.purge(&AccountId::from("never-created")).unwrap();
    }

    #[test]
    fn test_purge_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let artifacts = DataDirArtifacts::new(dir.path());
        assert!(artifacts.purge(&AccountId::from("..")).is_err());
        assert!(artifacts.purge(&AccountId::from("a/b")).is_err());
    }
}
