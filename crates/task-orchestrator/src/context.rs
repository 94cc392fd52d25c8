//! Application context built once at startup.

use crate::error::{ContextError, ContextResult};
use crate::orchestrator::TaskOrchestrator;
use campus_auth::{
    Authenticator, CasIdentityProvider, HttpProbe, IdentityProvider, ReachabilityProbe,
    RetryPolicy, SessionManager, TunnelResolver,
};
use campus_config_and_utils::{Config, Paths};
use credential_vault::{CredentialVault, DataDirArtifacts, FileVaultStore};
use std::sync::Arc;
use tracing::info;

/// Every long-lived service, wired together.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub paths: Arc<Paths>,
    pub vault: Arc<CredentialVault>,
    pub authenticator: Arc<Authenticator>,
    pub sessions: Arc<SessionManager>,
    pub orchestrator: Arc<TaskOrchestrator>,
}

impl AppContext {
    /// Open the vault under `paths` and talk to the configured identity provider.
    pub fn new(config: Config, paths: Paths) -> ContextResult<Self> {
        paths.ensure_dirs()?;
        let vault = Arc::new(CredentialVault::open(
            Arc::new(FileVaultStore::new(paths.vault_file())),
            Arc::new(DataDirArtifacts::new(paths.data_dir())),
            config.kdf,
        )?);
        let provider = Arc::new(CasIdentityProvider::new(config.identity.clone())?);
        let probe = Arc::new(
            HttpProbe::new(
                config.identity.probe_url.clone(),
                config.identity.probe_timeout(),
            )
            .map_err(|e| ContextError::Probe(e.to_string()))?,
        );

        info!(
            base_dir = %paths.base_dir().display(),
            accounts = vault.accounts().len(),
            route = ?config.route_preference,
            "Application context ready"
        );
        Ok(Self::with_services(config, paths, vault, provider, probe))
    }

    /// Wire the context around caller-supplied services.
    pub fn with_services(
        config: Config,
        paths: Paths,
        vault: Arc<CredentialVault>,
        provider: Arc<dyn IdentityProvider>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        let authenticator = Arc::new(Authenticator::new(
            vault.clone(),
            provider,
            TunnelResolver::new(config.route_preference, probe),
            retry.clone(),
            config.session.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            authenticator.clone(),
            &config.session,
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(sessions.clone(), retry));

        Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            vault,
            authenticator,
            sessions,
            orchestrator,
        }
    }
}
