//! Fake identity provider and fixtures shared by the login tests.

use crate::cas_client::needs_captcha;
use crate::{
    Authenticator, ChallengeSpec, DeliveryChannel, IdentityProvider, LoginAttempt, RawOutcome,
    RetryPolicy, SessionGrant, SessionManager, StaticProbe, SubmitOutcome, TunnelResolver,
    VerifyOutcome,
};
use async_trait::async_trait;
use campus_config_and_utils::{KdfSettings, RetrySettings, RoutePreference, SessionSettings};
use credential_vault::{
    Account, AccountKind, CredentialVault, MemoryVaultStore, NewAccount, NoArtifacts,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PASSWORD: &str = "correct-horse";
pub const GOOD_CODE: &str = "123456";
/// A well-formed code the fake reports as no longer valid.
pub const STALE_CODE: &str = "999999";
pub const CAPTCHA_TEXT: &str = "x7Kp";
pub const CAPTCHA_IMAGE: &[u8] = b"\xff\xd8fake-captcha";
const CAPTCHA_SCRATCH: &str = "fake.captcha";

/// In-memory identity provider.
///
/// Devices not in `trusted_devices` get a challenge when
/// `challenge_untrusted` is set. After repeated password failures the login
/// asks for [`CAPTCHA_TEXT`] and checks the password only once it is answered.
/// Each call first pops its failure queue.
pub struct FakeIdentityProvider {
    pub challenge_untrusted: Mutex<bool>,
    pub trusted_devices: Mutex<HashSet<String>>,
    pub tunnel_failures: Mutex<VecDeque<RawOutcome>>,
    pub submit_failures: Mutex<VecDeque<RawOutcome>>,
    pub send_failures: Mutex<VecDeque<RawOutcome>>,
    pub verify_failures: Mutex<VecDeque<RawOutcome>>,
    pub submit_delay: Mutex<Duration>,
    pub tunnel_calls: AtomicU32,
    pub submit_calls: AtomicU32,
    pub send_calls: AtomicU32,
    pub verify_calls: AtomicU32,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self {
            challenge_untrusted: Mutex::new(false),
            trusted_devices: Mutex::new(HashSet::new()),
            tunnel_failures: Mutex::new(VecDeque::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            send_failures: Mutex::new(VecDeque::new()),
            verify_failures: Mutex::new(VecDeque::new()),
            submit_delay: Mutex::new(Duration::ZERO),
            tunnel_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            send_calls: AtomicU32::new(0),
            verify_calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    pub fn require_challenges(&self) {
        *self.challenge_untrusted.lock() = true;
    }

    pub fn fail_tunnel(&self, outcome: RawOutcome, times: usize) {
        self.tunnel_failures
            .lock()
            .extend(std::iter::repeat(outcome).take(times));
    }

    pub fn fail_submit(&self, outcome: RawOutcome, times: usize) {
        self.submit_failures
            .lock()
            .extend(std::iter::repeat(outcome).take(times));
    }

    pub fn fail_verify(&self, outcome: RawOutcome, times: usize) {
        self.verify_failures
            .lock()
            .extend(std::iter::repeat(outcome).take(times));
    }

    pub fn submits(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn tunnels(&self) -> u32 {
        self.tunnel_calls.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrent_submits(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn negotiate_tunnel(&self, attempt: &mut LoginAttempt) -> Result<(), RawOutcome> {
        self.tunnel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.tunnel_failures.lock().pop_front() {
            return Err(outcome);
        }
        attempt.set_scratch("fake.tunnel", "open");
        Ok(())
    }

    async fn submit_credentials(
        &self,
        attempt: &mut LoginAttempt,
    ) -> Result<SubmitOutcome, RawOutcome> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(outcome) = self.submit_failures.lock().pop_front() {
            return Err(outcome);
        }
        if needs_captcha(attempt.failed_logins) {
            attempt.set_scratch(CAPTCHA_SCRATCH, "pending");
            return Ok(SubmitOutcome::ChallengeRequired(ChallengeSpec {
                channel: DeliveryChannel::captcha(CAPTCHA_IMAGE),
                code_length: 8,
            }));
        }
        if attempt.secret.as_str() != PASSWORD {
            return Err(RawOutcome::http(401, "bad password"));
        }
        let challenge = *self.challenge_untrusted.lock()
            && !self.trusted_devices.lock().contains(&attempt.device_id);
        if challenge {
            return Ok(SubmitOutcome::ChallengeRequired(ChallengeSpec {
                channel: DeliveryChannel::Sms {
                    masked_destination: "138****0000".into(),
                },
                code_length: 6,
            }));
        }
        Ok(SubmitOutcome::Authenticated(SessionGrant::default()))
    }

    async fn send_challenge_code(&self, _attempt: &LoginAttempt) -> Result<(), RawOutcome> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        match self.send_failures.lock().pop_front() {
            Some(outcome) => Err(outcome),
            None => Ok(()),
        }
    }

    async fn verify_challenge(
        &self,
        attempt: &mut LoginAttempt,
        code: &str,
        trust_client: bool,
    ) -> Result<VerifyOutcome, RawOutcome> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.verify_failures.lock().pop_front() {
            return Err(outcome);
        }
        if attempt.scratch(CAPTCHA_SCRATCH).is_some() {
            if code != CAPTCHA_TEXT {
                return Ok(VerifyOutcome::InvalidCode);
            }
            if attempt.secret.as_str() != PASSWORD {
                return Err(RawOutcome::http(401, "bad password"));
            }
            return Ok(VerifyOutcome::Authenticated(SessionGrant::default()));
        }
        match code {
            GOOD_CODE => {
                if trust_client {
                    self.trusted_devices.lock().insert(attempt.device_id.clone());
                }
                Ok(VerifyOutcome::Authenticated(SessionGrant::default()))
            }
            STALE_CODE => Ok(VerifyOutcome::Expired),
            _ => Ok(VerifyOutcome::InvalidCode),
        }
    }
}

pub fn test_kdf() -> KdfSettings {
    KdfSettings {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

/// Millisecond backoff so retry tests stay fast.
pub fn fast_retry() -> RetrySettings {
    RetrySettings {
        initial_delay_ms: 1,
        max_delay_ms: 4,
        rate_limit_min_delay_ms: 1,
        ..RetrySettings::default()
    }
}

pub struct AuthHarness {
    pub vault: Arc<CredentialVault>,
    pub provider: Arc<FakeIdentityProvider>,
    pub authenticator: Arc<Authenticator>,
    pub sessions: Arc<SessionManager>,
    pub account: Account,
}

impl AuthHarness {
    pub fn new() -> Self {
        Self::build(RoutePreference::Direct, SessionSettings::default())
    }

    pub fn with_route(route: RoutePreference) -> Self {
        Self::build(route, SessionSettings::default())
    }

    pub fn with_session_settings(settings: SessionSettings) -> Self {
        Self::build(RoutePreference::Direct, settings)
    }

    fn build(route: RoutePreference, settings: SessionSettings) -> Self {
        let vault = Arc::new(
            CredentialVault::open(
                Arc::new(MemoryVaultStore::new()),
                Arc::new(NoArtifacts),
                test_kdf(),
            )
            .unwrap(),
        );
        let provider = Arc::new(FakeIdentityProvider::new());
        let authenticator = Arc::new(Authenticator::new(
            vault.clone(),
            provider.clone(),
            TunnelResolver::new(route, Arc::new(StaticProbe(true))),
            RetryPolicy::new(fast_retry()),
            settings.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(authenticator.clone(), &settings));
        let account = vault
            .add_account(
                NewAccount::new("2220000001", AccountKind::Undergraduate),
                PASSWORD,
            )
            .unwrap();
        Self {
            vault,
            provider,
            authenticator,
            sessions,
            account,
        }
    }

    pub fn add_account(&self, username: &str, secret: &str) -> Account {
        self.vault
            .add_account(NewAccount::new(username, AccountKind::Graduate), secret)
            .unwrap()
    }
}
