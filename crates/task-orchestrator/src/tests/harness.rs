//! Fakes for orchestrator tests: a minimal identity provider and a scripted
//! task handler.

use crate::{AppContext, StepSpec, TaskHandler, TaskRequest, TaskTag};
use async_trait::async_trait;
use campus_auth::{
    ChallengeSpec, DeliveryChannel, IdentityProvider, LoginAttempt, RawOutcome, Session,
    SessionGrant, StaticProbe, SubmitOutcome, VerifyOutcome,
};
use campus_config_and_utils::{Config, KdfSettings, Paths, RetrySettings, RoutePreference};
use credential_vault::{
    Account, AccountId, AccountKind, CredentialVault, MemoryVaultStore, NewAccount, NoArtifacts,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct-horse";
pub const GOOD_CODE: &str = "123456";

/// Accepts [`PASSWORD`]; asks for a code on the next login when armed.
pub struct FakeProvider {
    challenge_next: Mutex<bool>,
    submits: AtomicU32,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            challenge_next: Mutex::new(false),
            submits: AtomicU32::new(0),
        }
    }

    pub fn challenge_next_login(&self) {
        *self.challenge_next.lock() = true;
    }

    pub fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn negotiate_tunnel(&self, _attempt: &mut LoginAttempt) -> Result<(), RawOutcome> {
        Ok(())
    }

    async fn submit_credentials(
        &self,
        attempt: &mut LoginAttempt,
    ) -> Result<SubmitOutcome, RawOutcome> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if attempt.secret.as_str() != PASSWORD {
            return Err(RawOutcome::http(401, "bad password"));
        }
        if std::mem::take(&mut *self.challenge_next.lock()) {
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
        Ok(())
    }

    async fn verify_challenge(
        &self,
        _attempt: &mut LoginAttempt,
        code: &str,
        _trust_client: bool,
    ) -> Result<VerifyOutcome, RawOutcome> {
        if code == GOOD_CODE {
            Ok(VerifyOutcome::Authenticated(SessionGrant::default()))
        } else {
            Ok(VerifyOutcome::InvalidCode)
        }
    }
}

/// Handler whose steps succeed unless a failure was queued for them.
pub struct ScriptedHandler {
    tag: TaskTag,
    steps: Vec<StepSpec>,
    failures: Mutex<HashMap<String, VecDeque<RawOutcome>>>,
    calls: Mutex<Vec<String>>,
    step_delay: Duration,
    active: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedHandler {
    pub fn new(tag: TaskTag, steps: Vec<StepSpec>) -> Self {
        Self {
            tag,
            steps,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            step_delay: Duration::ZERO,
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn fail(&self, step: &str, outcome: RawOutcome) {
        self.failures
            .lock()
            .entry(step.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Most steps that ever ran at the same time.
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn tag(&self) -> TaskTag {
        self.tag
    }

    fn steps(&self, _request: &TaskRequest) -> Vec<StepSpec> {
        self.steps.clone()
    }

    async fn execute(
        &self,
        step: &StepSpec,
        _session: &Session,
        _request: &TaskRequest,
        previous: &[Value],
    ) -> Result<Value, RawOutcome> {
        self.calls.lock().push(step.name.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .get_mut(&step.name)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(outcome) => Err(outcome),
            None => Ok(json!({ "step": step.name, "after": previous.len() })),
        }
    }

    fn parse(&self, _request: &TaskRequest, outputs: Vec<Value>) -> Result<Value, RawOutcome> {
        Ok(json!({ "kind": self.tag.as_str(), "steps": outputs }))
    }
}

pub struct TaskHarness {
    _dir: TempDir,
    pub ctx: AppContext,
    pub provider: Arc<FakeProvider>,
    pub account: Account,
}

impl TaskHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            route_preference: RoutePreference::Direct,
            retry: RetrySettings {
                initial_delay_ms: 1,
                max_delay_ms: 4,
                rate_limit_min_delay_ms: 1,
                ..RetrySettings::default()
            },
            kdf: KdfSettings {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
            ..Config::default()
        };

        let vault = Arc::new(
            CredentialVault::open(
                Arc::new(MemoryVaultStore::new()),
                Arc::new(NoArtifacts),
                config.kdf,
            )
            .unwrap(),
        );
        let account = vault
            .add_account(
                NewAccount::new("2220000001", AccountKind::Undergraduate),
                PASSWORD,
            )
            .unwrap();
        let provider = Arc::new(FakeProvider::new());
        let ctx = AppContext::with_services(
            config,
            Paths::with_base_dir(dir.path().to_path_buf()),
            vault,
            provider.clone(),
            Arc::new(StaticProbe(true)),
        );

        Self {
            _dir: dir,
            ctx,
            provider,
            account,
        }
    }

    pub fn add_account(&self, username: &str, secret: &str) -> AccountId {
        self.ctx
            .vault
            .add_account(NewAccount::new(username, AccountKind::Graduate), secret)
            .unwrap()
            .id
    }

    /// Register a handler and keep a typed reference for assertions.
    pub fn register(&self, handler: ScriptedHandler) -> Arc<ScriptedHandler> {
        let handler = Arc::new(handler);
        self.ctx.orchestrator.register(handler.clone());
        handler
    }

    /// Poll until no task is running.
    pub async fn settle(&self) {
        for _ in 0..200 {
            if self.ctx.orchestrator.running().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks still running: {:?}", self.ctx.orchestrator.running());
    }
}
