//! Identity provider login and per-account session management.
//!
//! This crate provides:
//! - Route selection between direct access and the WebVPN gateway
//! - Classification of remote failures and retry policy
//! - The login state machine, including verification challenges
//! - Exclusive per-account session leases

pub mod auth_fsm;
pub mod authenticator;
pub mod cas_client;
pub mod challenge;
pub mod classifier;
pub mod error;
pub mod provider;
pub mod retry;
pub mod session;
pub mod tunnel;

#[cfg(test)]
mod tests;

pub use auth_fsm::{
    AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChangedPayload,
};
pub use authenticator::{AuthEvent, Authenticator, ChallengeResolution};
pub use cas_client::CasIdentityProvider;
pub use challenge::{DeliveryChannel, VerificationChallenge, DEFAULT_CODE_LENGTH};
pub use classifier::{classify, RawOutcome};
pub use error::{AuthError, AuthResult, ClassifiedError, ErrorKind};
pub use provider::{
    ChallengeSpec, IdentityProvider, LoginAttempt, SessionGrant, SubmitOutcome, VerifyOutcome,
};
pub use retry::{CallSite, RetryDecision, RetryError, RetryPolicy};
pub use session::{Session, SessionLease, SessionManager};
pub use tunnel::{HttpProbe, ReachabilityProbe, Route, StaticProbe, TunnelResolver, WebVpnCodec};
