//! Task requests, results and the events a running task emits.

use campus_auth::{AuthError, ClassifiedError, ErrorKind, Route, VerificationChallenge};
use credential_vault::AccountId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of one submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The downstream operation to run, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Course timetable of a term; the current term when `term` is `None`.
    Schedule { term: Option<String> },
    /// Attendance records, optionally narrowed to one teaching week.
    Attendance {
        term: Option<String>,
        week: Option<u32>,
    },
    /// Grades of the given terms; all terms when empty.
    Score { terms: Vec<String> },
    /// Pending course evaluations. With `submit`, fill them in as well.
    Evaluation { submit: bool },
    /// One page of notices from a notice source.
    Notice { source: String, page: u32 },
}

impl TaskKind {
    pub fn tag(&self) -> TaskTag {
        match self {
            TaskKind::Schedule { .. } => TaskTag::Schedule,
            TaskKind::Attendance { .. } => TaskTag::Attendance,
            TaskKind::Score { .. } => TaskTag::Score,
            TaskKind::Evaluation { .. } => TaskTag::Evaluation,
            TaskKind::Notice { .. } => TaskTag::Notice,
        }
    }
}

/// Parameterless discriminant of [`TaskKind`]; handlers register by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTag {
    Schedule,
    Attendance,
    Score,
    Evaluation,
    Notice,
}

impl TaskTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskTag::Schedule => "schedule",
            TaskTag::Attendance => "attendance",
            TaskTag::Score => "score",
            TaskTag::Evaluation => "evaluation",
            TaskTag::Notice => "notice",
        }
    }
}

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub account_id: AccountId,
    pub kind: TaskKind,
    /// Overrides the account's route preference for this task's login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
}

impl TaskRequest {
    pub fn new(account_id: AccountId, kind: TaskKind) -> Self {
        Self {
            account_id,
            kind,
            route: None,
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }
}

/// Why a task did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "task cancelled")
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl From<AuthError> for TaskFailure {
    fn from(err: AuthError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<ClassifiedError> for TaskFailure {
    fn from(err: ClassifiedError) -> Self {
        Self::new(err.kind, err.outcome.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { payload: Value },
    Failure(TaskFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub account_id: AccountId,
    pub kind: TaskTag,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            TaskOutcome::Success { payload } => Some(payload),
            TaskOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            TaskOutcome::Success { .. } => None,
            TaskOutcome::Failure(failure) => Some(failure),
        }
    }
}

/// A status line while the task works through its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub step: String,
    /// Steps finished so far.
    pub completed: usize,
    pub total: usize,
    pub message: String,
}

impl TaskProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed.min(self.total) * 100 / self.total) as u8
    }
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Progress(TaskProgress),
    /// The task is parked until this challenge is answered.
    ChallengeRequired(VerificationChallenge),
    Finished(TaskResult),
}
