//! Drives login attempts through the auth state machine.
//!
//! One [`AuthMachine`] per account. Calls for the same account are
//! serialized on a per-account flight lock; different accounts log in
//! concurrently. A verification challenge keeps its [`LoginAttempt`] parked
//! until someone answers it, abandons it, or starts a new login.

use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthState, AuthStateChangedPayload};
use crate::challenge::{DeliveryChannel, VerificationChallenge, DEFAULT_CODE_LENGTH};
use crate::classifier::{classify, RawOutcome};
use crate::error::{AuthError, AuthResult, ClassifiedError, ErrorKind};
use crate::provider::{
    ChallengeSpec, IdentityProvider, LoginAttempt, SubmitOutcome, VerifyOutcome,
};
use crate::retry::{CallSite, RetryDecision, RetryPolicy};
use crate::session::Session;
use crate::tunnel::{Route, TunnelResolver};
use campus_config_and_utils::SessionSettings;
use credential_vault::{AccountId, CredentialVault, VaultError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;
/// Resolutions kept after a challenge closes, for late waiters.
const CLOSED_HISTORY: usize = 32;

/// Notifications for UIs and waiting pipelines.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    StateChanged(AuthStateChangedPayload),
    /// Render a prompt for this challenge.
    ChallengeRequired(VerificationChallenge),
    ChallengeResolved {
        challenge_id: String,
        account_id: AccountId,
        authenticated: bool,
    },
}

/// How a pending challenge ended.
#[derive(Debug, Clone)]
pub enum ChallengeResolution {
    Authenticated(Session),
    Expired,
    Failed { kind: ErrorKind, detail: String },
}

impl ChallengeResolution {
    fn into_result(self) -> AuthResult<Session> {
        match self {
            ChallengeResolution::Authenticated(session) => Ok(session),
            ChallengeResolution::Expired => Err(AuthError::ChallengeExpired),
            ChallengeResolution::Failed { kind, detail } => Err(AuthError::from_kind(kind, detail)),
        }
    }
}

struct PendingChallenge {
    challenge: VerificationChallenge,
    /// Taken out while a verification call is in flight.
    attempt: Option<LoginAttempt>,
    code_sent_at: Option<Instant>,
    resolution: watch::Sender<Option<ChallengeResolution>>,
}

pub struct Authenticator {
    vault: Arc<CredentialVault>,
    provider: Arc<dyn IdentityProvider>,
    tunnel: TunnelResolver,
    retry: RetryPolicy,
    settings: SessionSettings,
    machines: Mutex<HashMap<AccountId, AuthMachine>>,
    flights: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    pending: Mutex<HashMap<String, PendingChallenge>>,
    closed: Mutex<VecDeque<(String, ChallengeResolution)>>,
    /// Rejected passwords per account since its last successful login.
    failures: Mutex<HashMap<AccountId, u32>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Authenticator {
    pub fn new(
        vault: Arc<CredentialVault>,
        provider: Arc<dyn IdentityProvider>,
        tunnel: TunnelResolver,
        retry: RetryPolicy,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            vault,
            provider,
            tunnel,
            retry,
            settings,
            machines: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            closed: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, account_id: &AccountId) -> AuthState {
        self.machines
            .lock()
            .get(account_id)
            .map(|machine| AuthState::from(machine.state()))
            .unwrap_or(AuthState::Idle)
    }

    /// The open challenge of an account, if any.
    pub fn pending_challenge(&self, account_id: &AccountId) -> Option<VerificationChallenge> {
        self.pending
            .lock()
            .values()
            .find(|p| &p.challenge.account_id == account_id)
            .map(|p| p.challenge.clone())
    }

    /// Log an account in.
    ///
    /// `route` overrides the account's route preference. Starting a login
    /// abandons any challenge the account still has open.
    pub async fn login(&self, account_id: &AccountId, route: Option<Route>) -> AuthResult<Session> {
        let flight = self.flight(account_id);
        let _flight = flight.lock().await;

        let account = self.vault.account(account_id).map_err(not_configured)?;
        let credential = self.vault.credential(account_id).map_err(not_configured)?;
        if credential.secret.is_empty() {
            return Err(AuthError::NotConfigured(account_id.to_string()));
        }

        self.abandon_pending_for(account_id, "superseded by a new login");
        self.restart_machine(account_id);

        let route = match route {
            Some(route) => route,
            None => self.tunnel.resolve(account.route).await,
        };
        info!(account_id = %account_id, route = %route, "Starting login");
        let mut attempt = LoginAttempt::new(&account, credential, route);
        attempt.failed_logins = self.failed_logins(account_id);

        if route.is_tunneled() {
            self.transition(account_id, AuthMachineInput::TunnelRequested)?;
            let mut tries = 0;
            loop {
                let Err(outcome) = self.provider.negotiate_tunnel(&mut attempt).await else {
                    break;
                };
                if let Err(err) = self
                    .backoff(account_id, CallSite::TunnelNegotiation, &mut tries, outcome)
                    .await
                {
                    self.transition(account_id, AuthMachineInput::TunnelFailed)?;
                    warn!(account_id = %account_id, kind = %err.kind, "WebVPN gateway unavailable");
                    return Err(AuthError::TunnelUnavailable(err.outcome.to_string()));
                }
            }
            self.transition(account_id, AuthMachineInput::TunnelEstablished)?;
        } else {
            self.transition(account_id, AuthMachineInput::CredentialsSent)?;
        }

        let mut tries = 0;
        let outcome = loop {
            match self.provider.submit_credentials(&mut attempt).await {
                Ok(outcome) => break outcome,
                // Verification demanded through a business code rather than
                // the challenge flow.
                Err(raw) if classify(&raw) == ErrorKind::AuthChallengeRequired => {
                    debug!(account_id = %account_id, outcome = %raw, "Provider demands verification");
                    break SubmitOutcome::ChallengeRequired(ChallengeSpec {
                        channel: DeliveryChannel::Other,
                        code_length: DEFAULT_CODE_LENGTH,
                    });
                }
                Err(raw) => {
                    if let Err(err) = self
                        .backoff(account_id, CallSite::Login, &mut tries, raw)
                        .await
                    {
                        self.transition(account_id, AuthMachineInput::Rejected)?;
                        self.record_failure(account_id, err.kind);
                        warn!(account_id = %account_id, kind = %err.kind, attempts = err.attempts, "Login failed");
                        return Err(err.into());
                    }
                }
            }
        };

        match outcome {
            SubmitOutcome::Authenticated(grant) => {
                self.transition(account_id, AuthMachineInput::Accepted)?;
                self.failures.lock().remove(account_id);
                info!(account_id = %account_id, route = %route, "Login succeeded");
                Ok(Session::new(account_id.clone(), route, grant))
            }
            SubmitOutcome::ChallengeRequired(spec) => {
                self.transition(account_id, AuthMachineInput::ChallengeIssued)?;
                let challenge = VerificationChallenge::new(
                    account_id.clone(),
                    spec.channel,
                    spec.code_length,
                    self.settings.challenge_ttl(),
                );
                self.open_challenge(challenge.clone(), attempt);
                Err(AuthError::ChallengeRequired(challenge))
            }
        }
    }

    /// Answer an open challenge.
    ///
    /// A malformed or rejected code leaves the challenge open. With
    /// `trust_client` the account's device identifier is recorded as trusted
    /// so later logins skip the challenge.
    pub async fn answer_challenge(
        &self,
        challenge_id: &str,
        code: &str,
        trust_client: bool,
    ) -> AuthResult<Session> {
        let account_id = self.challenge(challenge_id)?.account_id;
        let flight = self.flight(&account_id);
        let _flight = flight.lock().await;

        // Re-read: the challenge may have been answered or dropped meanwhile.
        let challenge = self.challenge(challenge_id)?;
        if challenge.is_expired() {
            self.close_challenge(challenge_id, ChallengeResolution::Expired);
            self.try_transition(&account_id, AuthMachineInput::ChallengeAbandoned);
            return Err(AuthError::ChallengeExpired);
        }
        if !challenge.accepts_format(code) {
            debug!(challenge_id, "Verification code has the wrong format");
            return Err(AuthError::InvalidCode);
        }

        let mut attempt = self
            .take_attempt(challenge_id)
            .ok_or_else(|| AuthError::UnknownChallenge(challenge_id.to_string()))?;
        if let Err(e) = self.transition(&account_id, AuthMachineInput::CodeSubmitted) {
            self.park_attempt(challenge_id, attempt);
            return Err(e);
        }

        let mut tries = 0;
        let result = loop {
            match self
                .provider
                .verify_challenge(&mut attempt, code, trust_client)
                .await
            {
                Ok(outcome) => break Ok(outcome),
                Err(raw) => {
                    if let Err(err) = self
                        .backoff(&account_id, CallSite::ChallengeAnswer, &mut tries, raw)
                        .await
                    {
                        break Err(err);
                    }
                }
            }
        };

        match result {
            Ok(VerifyOutcome::Authenticated(grant)) => {
                self.transition(&account_id, AuthMachineInput::Accepted)?;
                self.failures.lock().remove(&account_id);
                if trust_client {
                    if let Err(e) = self.vault.set_trusted(&account_id, true) {
                        warn!(account_id = %account_id, error = %e, "Failed to record trusted device");
                    }
                }
                let session = Session::new(account_id.clone(), attempt.route, grant);
                self.close_challenge(
                    challenge_id,
                    ChallengeResolution::Authenticated(session.clone()),
                );
                info!(account_id = %account_id, trusted = trust_client, "Verification succeeded");
                Ok(session)
            }
            Ok(VerifyOutcome::InvalidCode) => {
                self.transition(&account_id, AuthMachineInput::CodeRejected)?;
                self.park_attempt(challenge_id, attempt);
                Err(AuthError::InvalidCode)
            }
            Ok(VerifyOutcome::Expired) => {
                self.transition(&account_id, AuthMachineInput::Rejected)?;
                self.close_challenge(challenge_id, ChallengeResolution::Expired);
                Err(AuthError::ChallengeExpired)
            }
            Err(err) if err.kind.is_transient() => {
                // Still answerable once the network recovers.
                self.transition(&account_id, AuthMachineInput::CodeRejected)?;
                self.park_attempt(challenge_id, attempt);
                Err(err.into())
            }
            Err(err) => {
                self.transition(&account_id, AuthMachineInput::Rejected)?;
                self.record_failure(&account_id, err.kind);
                self.close_challenge(
                    challenge_id,
                    ChallengeResolution::Failed {
                        kind: err.kind,
                        detail: err.outcome.to_string(),
                    },
                );
                Err(err.into())
            }
        }
    }

    /// Ask the provider to deliver the code for an open challenge.
    pub async fn request_challenge_code(&self, challenge_id: &str) -> AuthResult<()> {
        let account_id = self.challenge(challenge_id)?.account_id;
        let flight = self.flight(&account_id);
        let _flight = flight.lock().await;

        let cooldown = self.settings.code_resend_cooldown();
        let attempt = {
            let pending = self.pending.lock();
            let entry = pending
                .get(challenge_id)
                .ok_or_else(|| AuthError::UnknownChallenge(challenge_id.to_string()))?;
            if entry.challenge.is_expired() {
                return Err(AuthError::ChallengeExpired);
            }
            if let Some(sent_at) = entry.code_sent_at {
                let elapsed = sent_at.elapsed();
                if elapsed < cooldown {
                    return Err(AuthError::ResendCooldown(cooldown - elapsed));
                }
            }
            entry
                .attempt
                .clone()
                .ok_or_else(|| AuthError::UnknownChallenge(challenge_id.to_string()))?
        };

        self.retry
            .run(CallSite::Submission, |_| {
                self.provider.send_challenge_code(&attempt)
            })
            .await?;

        if let Some(entry) = self.pending.lock().get_mut(challenge_id) {
            entry.code_sent_at = Some(Instant::now());
        }
        info!(account_id = %account_id, challenge_id, "Verification code requested");
        Ok(())
    }

    /// Suspend until the challenge is answered, expires or is abandoned.
    pub async fn wait_for_resolution(&self, challenge_id: &str) -> AuthResult<Session> {
        let subscribed = self
            .pending
            .lock()
            .get(challenge_id)
            .map(|p| p.resolution.subscribe());
        let Some(mut rx) = subscribed else {
            // Closed before the caller got here.
            let closed = self
                .closed
                .lock()
                .iter()
                .find(|(id, _)| id == challenge_id)
                .map(|(_, resolution)| resolution.clone());
            return match closed {
                Some(resolution) => resolution.into_result(),
                None => Err(AuthError::UnknownChallenge(challenge_id.to_string())),
            };
        };

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(resolution) = current {
                return resolution.into_result();
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return match last {
                    Some(resolution) => resolution.into_result(),
                    None => Err(AuthError::ChallengeExpired),
                };
            }
        }
    }

    /// Give up on a challenge, e.g. because it timed out unanswered.
    pub async fn abandon_challenge(&self, challenge_id: &str) -> bool {
        let Ok(challenge) = self.challenge(challenge_id) else {
            return false;
        };
        let flight = self.flight(&challenge.account_id);
        let _flight = flight.lock().await;

        let resolution = if challenge.is_expired() {
            ChallengeResolution::Expired
        } else {
            ChallengeResolution::Failed {
                kind: ErrorKind::AuthChallengeRequired,
                detail: "challenge abandoned".to_string(),
            }
        };
        if !self.close_challenge(challenge_id, resolution) {
            return false;
        }
        self.try_transition(&challenge.account_id, AuthMachineInput::ChallengeAbandoned);
        true
    }

    /// Replace the account's device identifier and forget its trust.
    ///
    /// Returns the new identifier. Open challenges of the account are
    /// abandoned; the next login is expected to require a challenge.
    pub async fn reset_device_identity(
        &self,
        account_id: &AccountId,
        new_id: Option<String>,
    ) -> AuthResult<String> {
        let flight = self.flight(account_id);
        let _flight = flight.lock().await;

        let device_id = self
            .vault
            .reset_device_identity(account_id, new_id.as_deref())?;
        self.abandon_pending_for(account_id, "device identity reset");
        self.restart_machine(account_id);
        info!(account_id = %account_id, "Device identity reset");
        Ok(device_id)
    }

    /// Record that an authenticated session stopped working.
    pub fn session_lost(&self, account_id: &AccountId) {
        if self.state(account_id).is_authenticated() {
            self.try_transition(account_id, AuthMachineInput::SessionLost);
        }
    }

    /// Forget everything held for an account.
    pub fn forget(&self, account_id: &AccountId) {
        self.abandon_pending_for(account_id, "account removed");
        self.machines.lock().remove(account_id);
        self.flights.lock().remove(account_id);
        self.failures.lock().remove(account_id);
    }

    /// Rejected passwords since the account last logged in.
    pub fn failed_logins(&self, account_id: &AccountId) -> u32 {
        self.failures.lock().get(account_id).copied().unwrap_or(0)
    }

    fn record_failure(&self, account_id: &AccountId, kind: ErrorKind) {
        if kind != ErrorKind::InvalidCredentials {
            return;
        }
        let mut failures = self.failures.lock();
        let count = failures.entry(account_id.clone()).or_insert(0);
        *count += 1;
        debug!(account_id = %account_id, failed_logins = *count, "Password rejected");
    }

    fn flight(&self, account_id: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .lock()
            .entry(account_id.clone())
            .or_default()
            .clone()
    }

    fn challenge(&self, challenge_id: &str) -> AuthResult<VerificationChallenge> {
        self.pending
            .lock()
            .get(challenge_id)
            .map(|p| p.challenge.clone())
            .ok_or_else(|| AuthError::UnknownChallenge(challenge_id.to_string()))
    }

    /// Classify a failed provider call and wait out the backoff if the
    /// policy allows another attempt.
    async fn backoff(
        &self,
        account_id: &AccountId,
        site: CallSite,
        tries: &mut u32,
        outcome: RawOutcome,
    ) -> Result<(), ClassifiedError> {
        let kind = classify(&outcome);
        match self.retry.decide(kind, site, *tries) {
            RetryDecision::Surface => Err(ClassifiedError {
                kind,
                outcome,
                attempts: *tries + 1,
            }),
            RetryDecision::Retry(delay) => {
                debug!(
                    account_id = %account_id,
                    site = ?site,
                    kind = %kind,
                    attempt = *tries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying identity provider call"
                );
                self.try_transition(account_id, AuthMachineInput::TransientRetry);
                tokio::time::sleep(delay).await;
                *tries += 1;
                Ok(())
            }
        }
    }

    fn transition(&self, account_id: &AccountId, input: AuthMachineInput) -> AuthResult<AuthState> {
        let (old_state, new_state) = {
            let mut machines = self.machines.lock();
            let machine = machines
                .entry(account_id.clone())
                .or_insert_with(AuthMachine::new);
            let old_state = AuthState::from(machine.state());
            machine.consume(&input).map_err(|_| {
                AuthError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input, old_state
                ))
            })?;
            (old_state, AuthState::from(machine.state()))
        };

        debug!(
            account_id = %account_id,
            old_state = ?old_state,
            new_state = ?new_state,
            "Auth state transition"
        );
        if old_state != new_state {
            self.emit_state(account_id, old_state, new_state);
        }
        Ok(new_state)
    }

    /// Transition where an impossible input only deserves a log line.
    fn try_transition(&self, account_id: &AccountId, input: AuthMachineInput) {
        if let Err(e) = self.transition(account_id, input) {
            debug!(account_id = %account_id, error = %e, "Ignored auth transition");
        }
    }

    /// Bring the account's machine back to `Idle`.
    fn restart_machine(&self, account_id: &AccountId) {
        let old_state = {
            let mut machines = self.machines.lock();
            let machine = machines
                .entry(account_id.clone())
                .or_insert_with(AuthMachine::new);
            let old_state = AuthState::from(machine.state());
            if machine.consume(&AuthMachineInput::Reset).is_err() {
                if old_state.is_transient() {
                    warn!(account_id = %account_id, state = ?old_state, "Discarding interrupted login attempt");
                }
                *machine = AuthMachine::new();
            }
            old_state
        };
        if old_state != AuthState::Idle {
            self.emit_state(account_id, old_state, AuthState::Idle);
        }
    }

    fn emit_state(&self, account_id: &AccountId, old_state: AuthState, new_state: AuthState) {
        // No subscribers is fine.
        let _ = self.events.send(AuthEvent::StateChanged(AuthStateChangedPayload {
            account_id: account_id.clone(),
            old_state,
            new_state,
        }));
    }

    fn open_challenge(&self, challenge: VerificationChallenge, attempt: LoginAttempt) {
        let (resolution, _) = watch::channel(None);
        info!(
            account_id = %challenge.account_id,
            challenge_id = %challenge.id,
            expires_at = %challenge.expires_at,
            "Verification challenge opened"
        );
        self.pending.lock().insert(
            challenge.id.clone(),
            PendingChallenge {
                challenge: challenge.clone(),
                attempt: Some(attempt),
                code_sent_at: None,
                resolution,
            },
        );
        let _ = self.events.send(AuthEvent::ChallengeRequired(challenge));
    }

    fn take_attempt(&self, challenge_id: &str) -> Option<LoginAttempt> {
        self.pending
            .lock()
            .get_mut(challenge_id)
            .and_then(|p| p.attempt.take())
    }

    fn park_attempt(&self, challenge_id: &str, attempt: LoginAttempt) {
        if let Some(entry) = self.pending.lock().get_mut(challenge_id) {
            entry.attempt = Some(attempt);
        }
    }

    /// Remove a challenge and wake its waiters. False if it was not open.
    fn close_challenge(&self, challenge_id: &str, resolution: ChallengeResolution) -> bool {
        let Some(entry) = self.pending.lock().remove(challenge_id) else {
            return false;
        };
        let authenticated = matches!(resolution, ChallengeResolution::Authenticated(_));
        {
            let mut closed = self.closed.lock();
            if closed.len() >= CLOSED_HISTORY {
                closed.pop_front();
            }
            closed.push_back((challenge_id.to_string(), resolution.clone()));
        }
        entry.resolution.send_replace(Some(resolution));
        let _ = self.events.send(AuthEvent::ChallengeResolved {
            challenge_id: challenge_id.to_string(),
            account_id: entry.challenge.account_id.clone(),
            authenticated,
        });
        true
    }

    fn abandon_pending_for(&self, account_id: &AccountId, reason: &str) {
        let ids: Vec<String> = self
            .pending
            .lock()
            .values()
            .filter(|p| &p.challenge.account_id == account_id)
            .map(|p| p.challenge.id.clone())
            .collect();
        for id in ids {
            debug!(account_id = %account_id, challenge_id = %id, reason, "Abandoning verification challenge");
            self.close_challenge(
                &id,
                ChallengeResolution::Failed {
                    kind: ErrorKind::AuthChallengeRequired,
                    detail: reason.to_string(),
                },
            );
        }
    }
}

fn not_configured(err: VaultError) -> AuthError {
    match err {
        VaultError::AccountNotFound(id) => AuthError::NotConfigured(id.to_string()),
        other => AuthError::Vault(other),
    }
}
