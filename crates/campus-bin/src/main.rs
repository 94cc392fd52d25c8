//! campus-toolbox - manage accounts, the credential vault and identity provider logins.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use campus_config_and_utils::{init_logging, Config, Paths, RoutePreference};
use clap::{Parser, Subcommand, ValueEnum};
use credential_vault::AccountKind;
use output::OutputFormat;
use task_orchestrator::AppContext;
use tracing::debug;

/// campus-toolbox command-line interface.
#[derive(Parser)]
#[command(name = "campus-toolbox")]
#[command(about = "Campus identity provider automation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, vault and logs. Defaults to ~/.campus-toolbox
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Master password for an encrypted vault; prompted when needed
    #[arg(long, env = "CAMPUS_MASTER_PASSWORD", hide_env_values = true, global = true)]
    master_password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    Accounts {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Manage vault encryption
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },

    /// Log an account into the identity provider
    Login {
        /// Account id or username; the current account when omitted
        account: Option<String>,
        /// Route to use instead of the account's preference
        #[arg(long)]
        route: Option<RouteArg>,
        /// Trust this client so later logins skip verification
        #[arg(long)]
        trust: bool,
    },

    /// Generate a new device identity; the next login asks for verification
    ResetDevice {
        /// Account id or username
        account: String,
        /// Use this 32 character hex identifier instead of a random one
        #[arg(long)]
        device_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List accounts
    List,
    /// Add an account; the password is prompted
    Add {
        /// Student or staff number
        username: String,
        #[arg(short, long, value_enum, default_value = "undergraduate")]
        kind: KindArg,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value = "auto")]
        route: RouteArg,
    },
    /// Remove an account and its data directory
    Remove { account: String },
    /// Change the display name
    Rename { account: String, name: String },
    /// Make an account the current one
    Use { account: String },
    /// Set the route preference
    Route {
        account: String,
        #[arg(value_enum)]
        route: RouteArg,
    },
    /// Replace the stored password; the new one is prompted
    Password { account: String },
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Show whether the vault is encrypted and unlocked
    Status,
    /// Encrypt all stored passwords under a master password
    Encrypt,
    /// Store passwords unencrypted again
    Decrypt,
    /// Change the master password
    ChangePassword,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Undergraduate,
    Graduate,
}

impl From<KindArg> for AccountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Undergraduate => AccountKind::Undergraduate,
            KindArg::Graduate => AccountKind::Graduate,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RouteArg {
    Auto,
    Direct,
    Webvpn,
}

impl From<RouteArg> for RoutePreference {
    fn from(route: RouteArg) -> Self {
        match route {
            RouteArg::Auto => RoutePreference::Auto,
            RouteArg::Direct => RoutePreference::Direct,
            RouteArg::Webvpn => RoutePreference::WebVpn,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, Some(paths.log_file()));
    debug!(base_dir = %paths.base_dir().display(), "Starting campus-toolbox");

    let ctx = AppContext::new(config, paths)?;
    let format = cli.format;
    let master = cli.master_password.as_deref();

    match cli.command {
        Commands::Accounts { command } => match command {
            AccountCommands::List => commands::accounts_list(&ctx, &format),
            AccountCommands::Add {
                username,
                kind,
                name,
                route,
            } => commands::accounts_add(
                &ctx,
                master,
                &username,
                kind.into(),
                name,
                route.into(),
                &format,
            ),
            AccountCommands::Remove { account } => {
                commands::accounts_remove(&ctx, &account, &format).await
            }
            AccountCommands::Rename { account, name } => {
                commands::accounts_rename(&ctx, &account, &name, &format)
            }
            AccountCommands::Use { account } => commands::accounts_use(&ctx, &account, &format),
            AccountCommands::Route { account, route } => {
                commands::accounts_route(&ctx, &account, route.into(), &format)
            }
            AccountCommands::Password { account } => {
                commands::accounts_password(&ctx, master, &account, &format)
            }
        },
        Commands::Vault { command } => match command {
            VaultCommands::Status => commands::vault_status(&ctx, &format),
            VaultCommands::Encrypt => commands::vault_encrypt(&ctx, &format),
            VaultCommands::Decrypt => commands::vault_decrypt(&ctx, master, &format),
            VaultCommands::ChangePassword => commands::vault_change_password(&ctx, &format),
        },
        Commands::Login {
            account,
            route,
            trust,
        } => {
            let route = route.map(RoutePreference::from);
            commands::login(&ctx, master, account.as_deref(), route, trust, &format).await
        }
        Commands::ResetDevice { account, device_id } => {
            commands::reset_device(&ctx, &account, device_id, &format).await
        }
    }
}
