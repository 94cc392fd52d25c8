//! Runs task requests on per-account sessions.
//!
//! Every submitted task is its own tokio task. It holds the account's
//! session lease for its whole run, so tasks of one account execute one at a
//! time in the order they acquire the lease while different accounts proceed
//! in parallel.
//! Progress flows back over a per-task channel; cancellation is cooperative
//! and checked between steps, between retries and while waiting on a
//! verification challenge.

use crate::handler::{StepSpec, TaskHandler};
use crate::request::{
    TaskEvent, TaskFailure, TaskId, TaskOutcome, TaskProgress, TaskRequest, TaskResult, TaskTag,
};
use campus_auth::{
    classify, AuthError, ClassifiedError, ErrorKind, RawOutcome, RetryError, RetryPolicy, Route,
    SessionLease, SessionManager,
};
use credential_vault::AccountId;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Caller side of a submitted task.
///
/// Dropping the handle cancels the task unless it was detached.
pub struct TaskHandle {
    id: TaskId,
    account_id: AccountId,
    kind: TaskTag,
    events: mpsc::Receiver<TaskEvent>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    detached: bool,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Next event, or `None` once the task has finished and the stream is drained.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the result, discarding any events not yet consumed.
    pub async fn wait(mut self) -> TaskResult {
        while let Some(event) = self.events.recv().await {
            if let TaskEvent::Finished(result) = event {
                return result;
            }
        }

        // The stream closed without a result: the task panicked.
        let detail = match self.join.take() {
            Some(join) => match join.await {
                Err(e) => e.to_string(),
                Ok(()) => "task ended without a result".to_string(),
            },
            None => "task ended without a result".to_string(),
        };
        TaskResult {
            task_id: self.id.clone(),
            account_id: self.account_id.clone(),
            kind: self.kind,
            outcome: TaskOutcome::Failure(TaskFailure::new(ErrorKind::Unknown, detail)),
        }
    }

    /// Let the task run to completion without anyone listening.
    pub fn detach(mut self) -> TaskId {
        self.detached = true;
        self.id.clone()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.detached && !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
    }
}

struct Inner {
    sessions: Arc<SessionManager>,
    retry: RetryPolicy,
    handlers: RwLock<HashMap<TaskTag, Arc<dyn TaskHandler>>>,
    /// Cancellation tokens of tasks that have not finished.
    running: Mutex<HashMap<TaskId, CancellationToken>>,
}

/// Dispatches [`TaskRequest`]s to the registered [`TaskHandler`]s.
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn new(sessions: Arc<SessionManager>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions,
                retry,
                handlers: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register the handler for its tag, returning the one it replaces.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) -> Option<Arc<dyn TaskHandler>> {
        let tag = handler.tag();
        let previous = self.inner.handlers.write().insert(tag, handler);
        debug!(kind = %tag, replaced = previous.is_some(), "Task handler registered");
        previous
    }

    pub fn submit(&self, request: TaskRequest) -> TaskHandle {
        let id = TaskId::generate();
        let kind = request.kind.tag();
        let account_id = request.account_id.clone();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        self.inner
            .running
            .lock()
            .insert(id.clone(), cancel.clone());
        info!(task_id = %id, account_id = %account_id, kind = %kind, "Task submitted");

        let join = tokio::spawn({
            let inner = self.inner.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            async move { inner.run(id, request, tx, cancel).await }
        });

        TaskHandle {
            id,
            account_id,
            kind,
            events: rx,
            cancel,
            join: Some(join),
            detached: false,
        }
    }

    /// Cancel a task by id. False if it already finished.
    pub fn cancel(&self, id: &TaskId) -> bool {
        match self.inner.running.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> Vec<TaskId> {
        self.inner.running.lock().keys().cloned().collect()
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        id: TaskId,
        request: TaskRequest,
        events: mpsc::Sender<TaskEvent>,
        cancel: CancellationToken,
    ) {
        let outcome = match self.execute(&id, &request, &events, &cancel).await {
            Ok(payload) => {
                info!(task_id = %id, "Task finished");
                TaskOutcome::Success { payload }
            }
            Err(failure) if failure.kind == ErrorKind::Cancelled => {
                info!(task_id = %id, "Task cancelled");
                TaskOutcome::Failure(failure)
            }
            Err(failure) => {
                warn!(task_id = %id, kind = %failure.kind, detail = %failure.detail, "Task failed");
                TaskOutcome::Failure(failure)
            }
        };
        self.running.lock().remove(&id);

        let result = TaskResult {
            task_id: id,
            kind: request.kind.tag(),
            account_id: request.account_id,
            outcome,
        };
        // Nobody listening is fine.
        let _ = events.send(TaskEvent::Finished(result)).await;
    }

    async fn execute(
        &self,
        id: &TaskId,
        request: &TaskRequest,
        events: &mpsc::Sender<TaskEvent>,
        cancel: &CancellationToken,
    ) -> Result<Value, TaskFailure> {
        let tag = request.kind.tag();
        let handler = self.handlers.read().get(&tag).cloned().ok_or_else(|| {
            TaskFailure::new(ErrorKind::Unknown, format!("no handler registered for {tag}"))
        })?;

        let mut lease = tokio::select! {
            lease = self.sessions.lock(&request.account_id) => lease,
            _ = cancel.cancelled() => return Err(TaskFailure::cancelled()),
        };
        self.authenticate(&mut lease, request.route, events, cancel)
            .await?;

        let steps = handler.steps(request);
        let total = steps.len();
        let mut outputs: Vec<Value> = Vec::with_capacity(total);
        let mut reauthenticated = false;

        while outputs.len() < total {
            let index = outputs.len();
            let step = &steps[index];
            if cancel.is_cancelled() {
                return Err(TaskFailure::cancelled());
            }
            if let Some(service) = &step.escalates {
                if lease.session().is_some_and(|s| s.is_escalated(service)) {
                    debug!(task_id = %id, service = %service, "Already logged into service");
                    outputs.push(Value::Null);
                    continue;
                }
            }
            send_progress(events, id, step, index, total).await;

            if lease.session().is_none() {
                self.authenticate(&mut lease, request.route, events, cancel)
                    .await?;
            }
            let result = self
                .run_step(handler.as_ref(), step, &mut lease, request, &outputs, cancel)
                .await;

            match result {
                Ok(value) => outputs.push(value),
                Err(RetryError::Cancelled) => return Err(TaskFailure::cancelled()),
                Err(RetryError::Failed(err)) if needs_new_session(&err) && !reauthenticated => {
                    reauthenticated = true;
                    warn!(task_id = %id, step = %step.name, kind = %err.kind, "Service rejected the session, logging in again");
                    lease.invalidate();
                    self.authenticate(&mut lease, request.route, events, cancel)
                        .await?;
                    // Service logins belonged to the dropped session. Earlier
                    // outputs stay; the failed step runs again next turn.
                    for earlier in 0..index {
                        let Some(service) = &steps[earlier].escalates else {
                            continue;
                        };
                        if lease.session().is_some_and(|s| s.is_escalated(service)) {
                            continue;
                        }
                        debug!(task_id = %id, service = %service, "Repeating service login");
                        let value = self
                            .run_step(
                                handler.as_ref(),
                                &steps[earlier],
                                &mut lease,
                                request,
                                &outputs[..earlier],
                                cancel,
                            )
                            .await;
                        match value {
                            Ok(value) => outputs[earlier] = value,
                            Err(RetryError::Cancelled) => return Err(TaskFailure::cancelled()),
                            Err(RetryError::Failed(err)) => return Err(err.into()),
                        }
                    }
                }
                Err(RetryError::Failed(err)) => return Err(err.into()),
            }
        }

        let payload = handler
            .parse(request, outputs)
            .map_err(|raw| TaskFailure::new(classify(&raw), raw.to_string()))?;
        self.sessions.release(lease);
        Ok(payload)
    }

    /// Run one step under the retry policy and record a service login on
    /// success.
    async fn run_step(
        &self,
        handler: &dyn TaskHandler,
        step: &StepSpec,
        lease: &mut SessionLease,
        request: &TaskRequest,
        previous: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Value, RetryError> {
        let Some(session) = lease.session() else {
            return Err(RetryError::Failed(ClassifiedError {
                kind: ErrorKind::Unknown,
                outcome: RawOutcome::Malformed("no session after login".into()),
                attempts: 0,
            }));
        };
        let value = self
            .retry
            .run_until_cancelled(step.site, Some(cancel), |_| {
                handler.execute(step, session, request, previous)
            })
            .await?;

        if let Some(service) = &step.escalates {
            if let Some(session) = lease.session_mut() {
                session.mark_escalated(service.clone());
            }
        }
        lease.touch();
        Ok(value)
    }

    /// Make sure the lease holds a session, parking on a challenge if the
    /// identity provider asks for one.
    async fn authenticate(
        &self,
        lease: &mut SessionLease,
        route: Option<Route>,
        events: &mpsc::Sender<TaskEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), TaskFailure> {
        let attempt = tokio::select! {
            result = lease.ensure_authenticated(route) => result.map(|_| ()),
            _ = cancel.cancelled() => return Err(TaskFailure::cancelled()),
        };
        let challenge = match attempt {
            Ok(()) => return Ok(()),
            Err(AuthError::ChallengeRequired(challenge)) => challenge,
            Err(e) => return Err(e.into()),
        };

        info!(
            account_id = %challenge.account_id,
            challenge_id = %challenge.id,
            "Task waiting for verification"
        );
        let _ = events
            .send(TaskEvent::ChallengeRequired(challenge.clone()))
            .await;

        let authenticator = self.sessions.authenticator();
        let resolution = tokio::select! {
            result = authenticator.wait_for_resolution(&challenge.id) => result,
            _ = tokio::time::sleep(challenge.remaining()) => {
                authenticator.abandon_challenge(&challenge.id).await;
                // An answer may have landed just before the deadline.
                authenticator.wait_for_resolution(&challenge.id).await
            }
            _ = cancel.cancelled() => {
                authenticator.abandon_challenge(&challenge.id).await;
                return Err(TaskFailure::cancelled());
            }
        };

        let session = resolution.map_err(|e| match e {
            AuthError::ChallengeExpired => TaskFailure::new(
                ErrorKind::AuthChallengeRequired,
                "verification was not answered in time",
            ),
            other => other.into(),
        })?;
        lease.install(session)?;
        Ok(())
    }
}

/// A dropped session or a fresh verification demand both call for a new
/// login.
fn needs_new_session(err: &ClassifiedError) -> bool {
    err.outcome.is_auth_lost() || err.kind == ErrorKind::AuthChallengeRequired
}

async fn send_progress(
    events: &mpsc::Sender<TaskEvent>,
    id: &TaskId,
    step: &StepSpec,
    completed: usize,
    total: usize,
) {
    let progress = TaskProgress {
        task_id: id.clone(),
        step: step.name.clone(),
        completed,
        total,
        message: format!("{} ({}/{})", step.name, completed + 1, total),
    };
    let _ = events.send(TaskEvent::Progress(progress)).await;
}
