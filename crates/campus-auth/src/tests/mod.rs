//! Login, challenge and session tests against a fake identity provider.
//!
//! - `login`: routing, retries and error kinds of a plain login
//! - `challenges`: verification codes, device trust and waiting
//! - `sessions`: leases, expiry and per-account exclusivity

mod harness;
mod login;
