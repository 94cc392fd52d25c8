//! File system paths for the toolbox.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Vault filename under the base directory.
const VAULT_FILE_NAME: &str = "accounts.json";

/// Manages file system paths for the toolbox.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for all toolbox state (~/.campus-toolbox)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.campus-toolbox`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".campus-toolbox"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.campus-toolbox).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.campus-toolbox/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the credential vault path (~/.campus-toolbox/accounts.json).
    pub fn vault_file(&self) -> PathBuf {
        self.base_dir.join(VAULT_FILE_NAME)
    }

    /// Get the per-account data root (~/.campus-toolbox/data).
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Cached artifacts of one account (~/.campus-toolbox/data/<account_id>).
    pub fn account_data_dir(&self, account_id: &str) -> PathBuf {
        self.data_dir().join(account_id)
    }

    /// Get the logs directory (~/.campus-toolbox/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.campus-toolbox/logs/campus.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("campus.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
