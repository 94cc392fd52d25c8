//! CLI command implementations.

mod accounts;
mod login;
mod vault;

pub use accounts::{
    accounts_add, accounts_list, accounts_password, accounts_remove, accounts_rename,
    accounts_route, accounts_use,
};
pub use login::{login, reset_device};
pub use vault::{vault_change_password, vault_decrypt, vault_encrypt, vault_status};

use anyhow::{bail, Context, Result};
use credential_vault::{Account, AccountId};
use std::io::{self, Write};
use task_orchestrator::AppContext;

/// Find an account by id or username.
fn resolve_account(ctx: &AppContext, selector: &str) -> Result<Account> {
    if let Ok(account) = ctx.vault.account(&AccountId::from(selector)) {
        return Ok(account);
    }
    let mut matches = ctx
        .vault
        .accounts()
        .into_iter()
        .filter(|a| a.username == selector);
    match (matches.next(), matches.next()) {
        (Some(account), None) => Ok(account),
        (Some(_), Some(_)) => bail!("Several accounts use {selector}; pass the account id"),
        (None, _) => bail!("No account matches {selector}"),
    }
}

/// Unlock an encrypted vault, prompting for the master password if needed.
fn ensure_unlocked(ctx: &AppContext, master_password: Option<&str>) -> Result<()> {
    if !ctx.vault.is_locked() {
        return Ok(());
    }
    let password = match master_password {
        Some(password) => password.to_string(),
        None => rpassword::prompt_password("Master password: ")?,
    };
    ctx.vault
        .unlock(&password)
        .context("Could not unlock the vault")?;
    Ok(())
}

/// Read a line from stdin after printing `prompt`.
fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Prompt twice for a new password.
fn prompt_new_password(label: &str) -> Result<String> {
    let password = rpassword::prompt_password(format!("{label}: "))?;
    if password.is_empty() {
        bail!("{label} must not be empty");
    }
    let confirm = rpassword::prompt_password(format!("Repeat {}: ", label.to_lowercase()))?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}
