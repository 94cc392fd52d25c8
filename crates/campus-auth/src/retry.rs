//! Retry decisions keyed by error kind and call site.

use crate::classifier::{classify, RawOutcome};
use crate::error::{ClassifiedError, ErrorKind};
use campus_config_and_utils::RetrySettings;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a remote call happens. Determines how eagerly it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Login,
    TunnelNegotiation,
    ChallengeAnswer,
    /// Idempotent reads (attendance, notices, scores).
    Query,
    /// Non-idempotent writes such as an evaluation submit.
    Submission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Give up and surface the error.
    Surface,
}

/// Failure of a cancellable retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] ClassifiedError),
}

impl RetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetryError::Cancelled => ErrorKind::Cancelled,
            RetryError::Failed(err) => err.kind,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Retries allowed after the first attempt at this site.
    pub fn limit(&self, site: CallSite) -> u32 {
        match site {
            CallSite::Login | CallSite::TunnelNegotiation | CallSite::ChallengeAnswer => {
                self.settings.login_max_retries
            }
            CallSite::Query => self.settings.query_max_retries,
            CallSite::Submission => self.settings.submission_max_retries,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .settings
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.settings.max_delay_ms))
    }

    /// Decide what to do after attempt number `attempt` (0-indexed) failed.
    pub fn decide(&self, kind: ErrorKind, site: CallSite, attempt: u32) -> RetryDecision {
        let retryable = match site {
            CallSite::Submission => kind == ErrorKind::NetworkError,
            _ => kind.is_transient(),
        };
        if !retryable || attempt >= self.limit(site) {
            return RetryDecision::Surface;
        }

        let backoff = self.delay_for_attempt(attempt);
        if kind == ErrorKind::RateLimited {
            let floor = Duration::from_millis(self.settings.rate_limit_min_delay_ms);
            return RetryDecision::Retry(backoff.max(floor));
        }
        RetryDecision::Retry(backoff)
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// `op` receives the 0-indexed attempt number. At most `limit + 1`
    /// attempts are made; the last classified error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, site: CallSite, op: F) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawOutcome>>,
    {
        match self.run_until_cancelled(site, None, op).await {
            Ok(value) => Ok(value),
            Err(RetryError::Failed(err)) => Err(err),
            // Without a token the loop cannot be cancelled.
            Err(RetryError::Cancelled) => Err(ClassifiedError {
                kind: ErrorKind::Cancelled,
                outcome: RawOutcome::transport("cancelled"),
                attempts: 0,
            }),
        }
    }

    /// Like [`RetryPolicy::run`], but checks `cancel` before every attempt and
    /// while sleeping between attempts.
    pub async fn run_until_cancelled<T, F, Fut>(
        &self,
        site: CallSite,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawOutcome>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(RetryError::Cancelled);
            }

            let outcome = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(outcome) => outcome,
            };
            let kind = classify(&outcome);

            match self.decide(kind, site, attempt) {
                RetryDecision::Surface => {
                    return Err(RetryError::Failed(ClassifiedError {
                        kind,
                        outcome,
                        attempts: attempt + 1,
                    }));
                }
                RetryDecision::Retry(delay) => {
                    debug!(
                        site = ?site,
                        kind = %kind,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient failure"
                    );
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(RetryError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }
}
