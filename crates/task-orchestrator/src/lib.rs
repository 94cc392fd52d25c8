//! Task execution on top of authenticated per-account sessions.
//!
//! A [`TaskRequest`] names an account and a [`TaskKind`]. The
//! [`TaskOrchestrator`] takes the account's session lease, logs in (parking
//! on verification challenges), runs the registered [`TaskHandler`]'s steps
//! under the retry policy and reports progress and the final [`TaskResult`]
//! over the [`TaskHandle`].

mod context;
mod error;
mod handler;
mod orchestrator;
mod request;

#[cfg(test)]
mod tests;

pub use context::AppContext;
pub use error::{ContextError, ContextResult};
pub use handler::{StepSpec, TaskHandler};
pub use orchestrator::{TaskHandle, TaskOrchestrator};
pub use request::{
    TaskEvent, TaskFailure, TaskId, TaskKind, TaskOutcome, TaskProgress, TaskRequest, TaskResult,
    TaskTag,
};
