//! Vault encryption commands.

use super::{ensure_unlocked, prompt_new_password};
use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use credential_vault::VaultState;
use task_orchestrator::AppContext;

pub fn vault_status(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    let state = match ctx.vault.state() {
        VaultState::Plaintext => "plaintext",
        VaultState::Locked => "locked",
        VaultState::Unlocked => "unlocked",
    };
    let accounts = ctx.vault.accounts().len();
    let vault_file = ctx.paths.vault_file();

    match format {
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "state": state,
            "encrypted": ctx.vault.is_encrypted(),
            "accounts": accounts,
            "path": vault_file,
        })),
        OutputFormat::Text => {
            output::print_heading("Credential vault");
            output::print_row("State", state);
            output::print_row("Accounts", &accounts.to_string());
            output::print_row("Path", &vault_file.display().to_string());
        }
    }
    Ok(())
}

/// Encrypt stored passwords under a new master password.
pub fn vault_encrypt(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    if ctx.vault.is_encrypted() {
        bail!("Vault is already encrypted; use 'vault change-password' instead");
    }
    let password = prompt_new_password("Master password")?;
    ctx.vault
        .enable_encryption(&password)
        .context("Failed to encrypt the vault")?;
    output::print_success("Vault encrypted", format);
    Ok(())
}

pub fn vault_decrypt(
    ctx: &AppContext,
    master_password: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    if !ctx.vault.is_encrypted() {
        output::print_success("Vault is not encrypted", format);
        return Ok(());
    }
    ensure_unlocked(ctx, master_password)?;
    ctx.vault
        .set_encryption_enabled(false, None)
        .context("Failed to decrypt the vault")?;
    output::print_success("Vault stored unencrypted", format);
    Ok(())
}

pub fn vault_change_password(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    if !ctx.vault.is_encrypted() {
        bail!("Vault is not encrypted; use 'vault encrypt' first");
    }
    let old = rpassword::prompt_password("Current master password: ")?;
    let new = prompt_new_password("New master password")?;
    ctx.vault
        .change_master_password(&old, &new)
        .context("Failed to change the master password")?;
    output::print_success("Master password changed", format);
    Ok(())
}
