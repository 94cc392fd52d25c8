//! Contract implemented by each downstream service integration.

use crate::request::{TaskRequest, TaskTag};
use async_trait::async_trait;
use campus_auth::{CallSite, RawOutcome, Session};
use serde_json::Value;

/// One remote call of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub name: String,
    /// Decides how failures of this step are retried.
    pub site: CallSite,
    /// Set on steps that log the session into a downstream service. Such a
    /// step is skipped when the session is already logged into it.
    pub escalates: Option<String>,
}

impl StepSpec {
    /// An idempotent read.
    pub fn query(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site: CallSite::Query,
            escalates: None,
        }
    }

    /// A write that must not be repeated after an ambiguous failure.
    pub fn submission(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site: CallSite::Submission,
            escalates: None,
        }
    }

    /// Login into `service` using the identity provider session.
    pub fn escalation(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            name: format!("login {service}"),
            site: CallSite::Query,
            escalates: Some(service),
        }
    }
}

/// Executes one [`TaskTag`] against an authenticated session.
///
/// Failures are reported as [`RawOutcome`]s; the orchestrator classifies and
/// retries them. A step returning [`RawOutcome::AuthLost`] or a verification
/// demand makes the orchestrator log in again once, repeat the service logins
/// the new session lacks, and then repeat the step.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn tag(&self) -> TaskTag;

    fn steps(&self, request: &TaskRequest) -> Vec<StepSpec>;

    /// Run one step. `previous` holds the outputs of the steps before it.
    async fn execute(
        &self,
        step: &StepSpec,
        session: &Session,
        request: &TaskRequest,
        previous: &[Value],
    ) -> Result<Value, RawOutcome>;

    /// Turn the step outputs into the task payload.
    fn parse(&self, request: &TaskRequest, outputs: Vec<Value>) -> Result<Value, RawOutcome>;
}
