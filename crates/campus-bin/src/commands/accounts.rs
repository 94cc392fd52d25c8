//! Account management commands.

use super::{ensure_unlocked, prompt_new_password, resolve_account};
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use campus_config_and_utils::RoutePreference;
use credential_vault::{Account, AccountKind, NewAccount};
use task_orchestrator::AppContext;

fn kind_label(kind: AccountKind) -> &'static str {
    match kind {
        AccountKind::Undergraduate => "undergraduate",
        AccountKind::Graduate => "graduate",
    }
}

fn print_account(account: &Account, current: bool) {
    let marker = if current { " (current)" } else { "" };
    output::print_heading(&format!("{}{}", account.display_name, marker));
    output::print_row("ID", account.id.as_str());
    output::print_row("Username", &account.username);
    output::print_row("Kind", kind_label(account.kind));
    output::print_row("Route", &account.route.to_string());
    output::print_row("Trusted client", if account.trusted_client { "yes" } else { "no" });
    output::print_row("Added", &account.created_at.format("%Y-%m-%d %H:%M").to_string());
}

/// List all accounts.
pub fn accounts_list(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    let accounts = ctx.vault.accounts();
    match format {
        OutputFormat::Json => output::print_json(&accounts),
        OutputFormat::Text => {
            if accounts.is_empty() {
                println!("No accounts. Add one with 'campus-toolbox accounts add <username>'.");
                return Ok(());
            }
            let current = ctx.vault.current().map(|a| a.id);
            for account in &accounts {
                print_account(account, current.as_ref() == Some(&account.id));
            }
        }
    }
    Ok(())
}

/// Add an account, prompting for its password.
pub fn accounts_add(
    ctx: &AppContext,
    master_password: Option<&str>,
    username: &str,
    kind: AccountKind,
    name: Option<String>,
    route: RoutePreference,
    format: &OutputFormat,
) -> Result<()> {
    ensure_unlocked(ctx, master_password)?;
    let secret = prompt_new_password("Password")?;

    let mut new = NewAccount::new(username, kind).route(route);
    if let Some(name) = name {
        new = new.display_name(name);
    }
    let account = ctx
        .vault
        .add_account(new, &secret)
        .context("Failed to add account")?;

    match format {
        OutputFormat::Json => output::print_json(&account),
        OutputFormat::Text => {
            output::print_success(&format!("Added account {}", account.username), format);
            print_account(&account, false);
        }
    }
    Ok(())
}

/// Remove an account, its session and its data directory.
pub async fn accounts_remove(ctx: &AppContext, account: &str, format: &OutputFormat) -> Result<()> {
    let account = resolve_account(ctx, account)?;
    ctx.sessions.forget(&account.id).await;
    ctx.vault.remove_account(&account.id)?;
    output::print_success(&format!("Removed account {}", account.username), format);
    Ok(())
}

pub fn accounts_rename(
    ctx: &AppContext,
    account: &str,
    name: &str,
    format: &OutputFormat,
) -> Result<()> {
    let account = resolve_account(ctx, account)?;
    ctx.vault.rename_account(&account.id, name)?;
    output::print_success(&format!("Renamed {} to {}", account.username, name), format);
    Ok(())
}

pub fn accounts_use(ctx: &AppContext, account: &str, format: &OutputFormat) -> Result<()> {
    let account = resolve_account(ctx, account)?;
    ctx.vault.set_current(&account.id)?;
    output::print_success(
        &format!("Current account is now {}", account.display_name),
        format,
    );
    Ok(())
}

pub fn accounts_route(
    ctx: &AppContext,
    account: &str,
    route: RoutePreference,
    format: &OutputFormat,
) -> Result<()> {
    let account = resolve_account(ctx, account)?;
    ctx.vault.set_route(&account.id, route)?;
    output::print_success(
        &format!("{} now uses the {} route", account.username, route),
        format,
    );
    Ok(())
}

/// Replace the stored password, prompting for the new one.
pub fn accounts_password(
    ctx: &AppContext,
    master_password: Option<&str>,
    account: &str,
    format: &OutputFormat,
) -> Result<()> {
    ensure_unlocked(ctx, master_password)?;
    let account = resolve_account(ctx, account)?;
    let secret = prompt_new_password("New password")?;
    ctx.vault.update_secret(&account.id, &secret)?;
    output::print_success(&format!("Password updated for {}", account.username), format);
    Ok(())
}
