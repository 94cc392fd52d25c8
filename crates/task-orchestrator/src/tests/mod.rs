//! Orchestrator scenarios against a fake identity provider.
//!
//! - `pipeline`: steps, retries, re-login and per-account ordering
//! - `cancellation`: challenges, cancel and handle lifetime

mod harness;
