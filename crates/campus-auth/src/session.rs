//! Per-account sessions and their exclusive leases.
//!
//! Each account has one slot behind a `tokio::sync::Mutex`. Holding the
//! lock is the only way to use or replace the session, so two pipelines
//! never drive the same account at once. The mutex is fair: waiters get the
//! slot in the order they asked for it.

use crate::authenticator::Authenticator;
use crate::error::{AuthError, AuthResult};
use crate::provider::SessionGrant;
use crate::tunnel::Route;
use campus_config_and_utils::SessionSettings;
use chrono::{DateTime, Utc};
use credential_vault::AccountId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Authenticated transport state of one account.
#[derive(Debug, Clone)]
pub struct Session {
    account_id: AccountId,
    route: Route,
    grant: SessionGrant,
    established_at: DateTime<Utc>,
    last_used: Instant,
    /// Downstream services this session has already logged into.
    escalated: BTreeSet<String>,
}

impl Session {
    pub fn new(account_id: AccountId, route: Route, grant: SessionGrant) -> Self {
        Self {
            account_id,
            route,
            grant,
            established_at: Utc::now(),
            last_used: Instant::now(),
            escalated: BTreeSet::new(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn grant(&self) -> &SessionGrant {
        &self.grant
    }

    /// HTTP client carrying the session cookies.
    pub fn client(&self) -> Option<&reqwest::Client> {
        self.grant.client.as_ref()
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Expired by idleness or by the provider's hard expiry.
    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout
            || self
                .grant
                .expires_at
                .is_some_and(|expires_at| Utc::now() >= expires_at)
    }

    /// Remember that `service` accepted this session. Returns false if it
    /// was already recorded.
    pub fn mark_escalated(&mut self, service: impl Into<String>) -> bool {
        self.escalated.insert(service.into())
    }

    pub fn is_escalated(&self, service: &str) -> bool {
        self.escalated.contains(service)
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Session>,
}

/// Exclusive hold on an account's session slot. Dropping it releases the slot.
pub struct SessionLease {
    account_id: AccountId,
    slot: OwnedMutexGuard<Slot>,
    authenticator: Arc<Authenticator>,
    idle_timeout: Duration,
}

impl SessionLease {
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// The current session, unless absent or expired.
    pub fn session(&self) -> Option<&Session> {
        self.slot
            .session
            .as_ref()
            .filter(|s| !s.is_expired(self.idle_timeout))
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        let idle_timeout = self.idle_timeout;
        self.slot
            .session
            .as_mut()
            .filter(|s| !s.is_expired(idle_timeout))
    }

    /// Return a live session, logging in when there is none or it expired.
    ///
    /// A challenge surfaces as [`AuthError::ChallengeRequired`]; the holder
    /// keeps the lease while the challenge is answered and then calls
    /// [`SessionLease::install`].
    pub async fn ensure_authenticated(&mut self, route: Option<Route>) -> AuthResult<&Session> {
        if self
            .slot
            .session
            .as_ref()
            .is_some_and(|s| s.is_expired(self.idle_timeout))
        {
            info!(account_id = %self.account_id, "Session expired");
            self.drop_session();
        }

        if let Some(session) = self.slot.session.as_mut() {
            session.touch();
        } else {
            let session = self.authenticator.login(&self.account_id, route).await?;
            self.slot.session = Some(session);
        }
        self.slot
            .session
            .as_ref()
            .ok_or_else(|| AuthError::Unknown("session vanished after login".to_string()))
    }

    /// Store a session obtained elsewhere, e.g. from an answered challenge.
    pub fn install(&mut self, session: Session) -> AuthResult<()> {
        if session.account_id() != &self.account_id {
            return Err(AuthError::Unknown(format!(
                "session of {} offered to {}",
                session.account_id(),
                self.account_id
            )));
        }
        debug!(account_id = %self.account_id, "Session installed");
        self.slot.session = Some(session);
        Ok(())
    }

    /// Discard the session after a downstream call reported it dead.
    pub fn invalidate(&mut self) {
        if self.slot.session.is_some() {
            info!(account_id = %self.account_id, "Session invalidated");
            self.drop_session();
        }
    }

    pub fn touch(&mut self) {
        if let Some(session) = self.slot.session.as_mut() {
            session.touch();
        }
    }

    fn drop_session(&mut self) {
        self.slot.session = None;
        self.authenticator.session_lost(&self.account_id);
    }
}

/// Holds at most one session per account and hands out exclusive leases.
pub struct SessionManager {
    authenticator: Arc<Authenticator>,
    idle_timeout: Duration,
    slots: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<Slot>>>>,
}

impl SessionManager {
    pub fn new(authenticator: Arc<Authenticator>, settings: &SessionSettings) -> Self {
        Self {
            authenticator,
            idle_timeout: settings.idle_timeout(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Wait for exclusive use of the account's slot without logging in.
    pub async fn lock(&self, account_id: &AccountId) -> SessionLease {
        let slot = self.slot(account_id);
        let guard = slot.lock_owned().await;
        debug!(account_id = %account_id, "Session slot acquired");
        SessionLease {
            account_id: account_id.clone(),
            slot: guard,
            authenticator: self.authenticator.clone(),
            idle_timeout: self.idle_timeout,
        }
    }

    /// Lock the slot and make sure it holds a live session.
    pub async fn acquire(&self, account_id: &AccountId) -> AuthResult<SessionLease> {
        let mut lease = self.lock(account_id).await;
        lease.ensure_authenticated(None).await?;
        Ok(lease)
    }

    pub fn release(&self, lease: SessionLease) {
        debug!(account_id = %lease.account_id, "Session slot released");
        drop(lease);
    }

    /// Log in afresh, replacing any cached session.
    pub async fn login(&self, account_id: &AccountId, route: Option<Route>) -> AuthResult<Session> {
        let mut lease = self.lock(account_id).await;
        lease.invalidate();
        let session = lease.ensure_authenticated(route).await?.clone();
        Ok(session)
    }

    /// Answer a challenge and cache the resulting session.
    ///
    /// When a pipeline holds the slot it is waiting on this challenge and
    /// installs the session itself.
    pub async fn answer_challenge(
        &self,
        challenge_id: &str,
        code: &str,
        trust_client: bool,
    ) -> AuthResult<Session> {
        let session = self
            .authenticator
            .answer_challenge(challenge_id, code, trust_client)
            .await?;
        if let Ok(mut slot) = self.slot(session.account_id()).try_lock_owned() {
            slot.session = Some(session.clone());
        }
        Ok(session)
    }

    /// Reset the device identity and drop the cached session.
    pub async fn reset_device_identity(
        &self,
        account_id: &AccountId,
        new_id: Option<String>,
    ) -> AuthResult<String> {
        // Resetting first wakes any pipeline parked on a challenge so the
        // slot frees up.
        let device_id = self
            .authenticator
            .reset_device_identity(account_id, new_id)
            .await?;
        self.logout(account_id).await;
        Ok(device_id)
    }

    pub async fn logout(&self, account_id: &AccountId) {
        self.lock(account_id).await.invalidate();
    }

    /// Drop all state for a removed account.
    pub async fn forget(&self, account_id: &AccountId) {
        self.logout(account_id).await;
        self.slots.lock().remove(account_id);
        self.authenticator.forget(account_id);
    }

    /// Whether the account has a live session. A slot in use counts as live.
    pub fn has_session(&self, account_id: &AccountId) -> bool {
        let Some(slot) = self.slots.lock().get(account_id).cloned() else {
            return false;
        };
        let live = match slot.try_lock() {
            Ok(slot) => slot
                .session
                .as_ref()
                .is_some_and(|s| !s.is_expired(self.idle_timeout)),
            Err(_) => true,
        };
        live
    }

    fn slot(&self, account_id: &AccountId) -> Arc<tokio::sync::Mutex<Slot>> {
        self.slots
            .lock()
            .entry(account_id.clone())
            .or_default()
            .clone()
    }
}
