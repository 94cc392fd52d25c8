//! Contract between the login state machine and the identity provider.

use crate::challenge::DeliveryChannel;
use crate::classifier::RawOutcome;
use crate::tunnel::Route;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credential_vault::{Account, AccountId, Credential};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Everything one login attempt needs, carried across its provider calls.
///
/// Lives from the first request until the attempt is authenticated or
/// abandoned, including while a verification challenge is pending.
#[derive(Clone)]
pub struct LoginAttempt {
    pub account_id: AccountId,
    pub username: String,
    pub secret: Zeroizing<String>,
    /// Visitor identifier the provider associates trust with.
    pub device_id: String,
    pub trusted_client: bool,
    pub route: Route,
    /// Rejected passwords since the account's last successful login.
    pub failed_logins: u32,
    /// Provider-private values such as form tokens.
    pub scratch: BTreeMap<String, String>,
    /// HTTP client whose cookie jar accumulates the login.
    pub client: Option<reqwest::Client>,
}

impl LoginAttempt {
    pub fn new(account: &Account, credential: Credential, route: Route) -> Self {
        Self {
            account_id: account.id.clone(),
            username: credential.username,
            secret: credential.secret,
            device_id: account.device_id.clone(),
            trusted_client: account.trusted_client,
            route,
            failed_logins: 0,
            scratch: BTreeMap::new(),
            client: None,
        }
    }

    pub fn scratch(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub fn set_scratch(&mut self, key: &str, value: impl Into<String>) {
        self.scratch.insert(key.to_string(), value.into());
    }
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("account_id", &self.account_id)
            .field("username", &self.username)
            .field("device_id", &self.device_id)
            .field("trusted_client", &self.trusted_client)
            .field("route", &self.route)
            .field("failed_logins", &self.failed_logins)
            .finish_non_exhaustive()
    }
}

/// Authenticated transport state handed out by the provider.
#[derive(Clone, Default)]
pub struct SessionGrant {
    /// Client carrying the authenticated cookie jar.
    pub client: Option<reqwest::Client>,
    /// Hard expiry announced by the provider, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("has_client", &self.client.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What the provider asked for after a challenge was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSpec {
    pub channel: DeliveryChannel,
    pub code_length: usize,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Authenticated(SessionGrant),
    ChallengeRequired(ChallengeSpec),
}

#[derive(Debug)]
pub enum VerifyOutcome {
    Authenticated(SessionGrant),
    /// Wrong code; the same challenge may be answered again.
    InvalidCode,
    /// The provider no longer accepts codes for this challenge.
    Expired,
}

/// The remote identity provider.
///
/// Implementations report failures as [`RawOutcome`]s; classification and
/// retries happen in the caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Open the gateway session used by the WebVPN route.
    async fn negotiate_tunnel(&self, attempt: &mut LoginAttempt) -> Result<(), RawOutcome>;

    /// Submit the credentials. A provider may answer with a captcha
    /// challenge once `attempt.failed_logins` is high enough.
    async fn submit_credentials(
        &self,
        attempt: &mut LoginAttempt,
    ) -> Result<SubmitOutcome, RawOutcome>;

    /// Ask the provider to deliver a one-time code.
    async fn send_challenge_code(&self, attempt: &LoginAttempt) -> Result<(), RawOutcome>;

    /// Check a one-time code or captcha answer and finish the login.
    async fn verify_challenge(
        &self,
        attempt: &mut LoginAttempt,
        code: &str,
        trust_client: bool,
    ) -> Result<VerifyOutcome, RawOutcome>;
}
