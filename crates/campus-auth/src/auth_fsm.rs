//! Login state machine using rust-fsm.
//!
//! One machine per account. It tracks a single login attempt from the
//! optional tunnel handshake through credential submission and, when the
//! identity provider asks for it, the verification code exchange.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │      Idle       │ (initial)
//! └──┬───────────┬──┘
//!    │           │ CredentialsSent
//!    │ TunnelRequested          ┌──────────────────────┐
//!    ▼           │              │                      │ TransientRetry
//! ┌─────────────────┐ TunnelEstablished ┌──────────────▼───────┐
//! │TunnelNegotiating│ ────────────────► │ CredentialsSubmitted │
//! └────────┬────────┘           └─────► └───┬──────────┬───────┘
//!          │ TunnelFailed                   │ Accepted │ ChallengeIssued
//!          ▼                                │          ▼
//!      Failed ◄──── Rejected ───────────────┤   ┌────────────────────┐
//!                                           │   │ ChallengeRequired  │ ◄─┐
//!                                           │   └─────────┬──────────┘   │
//!                                           │             │ CodeSubmitted │ CodeRejected
//!                                           │             ▼               │
//!                                           │   ┌────────────────────┐   │
//!                                           │   │ ChallengeSubmitted │ ──┘
//!                                           ▼   └─────────┬──────────┘
//!                                   Authenticated ◄───────┘ Accepted
//! ```
//!
//! `Authenticated` and `Failed` return to `Idle` on `Reset`; an
//! authenticated machine also returns there when the session is lost.

use credential_vault::AccountId;
use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Idle)

    Idle => {
        TunnelRequested => TunnelNegotiating,
        CredentialsSent => CredentialsSubmitted
    },
    TunnelNegotiating => {
        // Gateway is up, credentials go out through it
        TunnelEstablished => CredentialsSubmitted,
        TransientRetry => TunnelNegotiating,
        TunnelFailed => Failed
    },
    CredentialsSubmitted => {
        Accepted => Authenticated,
        ChallengeIssued => ChallengeRequired,
        TransientRetry => CredentialsSubmitted,
        Rejected => Failed
    },
    ChallengeRequired => {
        CodeSubmitted => ChallengeSubmitted,
        ChallengeAbandoned => Failed,
        Reset => Idle
    },
    ChallengeSubmitted => {
        Accepted => Authenticated,
        // Wrong code, the same challenge can be answered again
        CodeRejected => ChallengeRequired,
        TransientRetry => ChallengeSubmitted,
        Rejected => Failed
    },
    Authenticated => {
        SessionLost => Idle,
        Reset => Idle
    },
    Failed => {
        Reset => Idle
    }
}

pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Serializable view of the machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Idle,
    TunnelNegotiating,
    CredentialsSubmitted,
    ChallengeRequired,
    ChallengeSubmitted,
    Authenticated,
    Failed,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// A network exchange is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::TunnelNegotiating
                | AuthState::CredentialsSubmitted
                | AuthState::ChallengeSubmitted
        )
    }

    /// The attempt is over, one way or the other.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Idle => AuthState::Idle,
            AuthMachineState::TunnelNegotiating => AuthState::TunnelNegotiating,
            AuthMachineState::CredentialsSubmitted => AuthState::CredentialsSubmitted,
            AuthMachineState::ChallengeRequired => AuthState::ChallengeRequired,
            AuthMachineState::ChallengeSubmitted => AuthState::ChallengeSubmitted,
            AuthMachineState::Authenticated => AuthState::Authenticated,
            AuthMachineState::Failed => AuthState::Failed,
        }
    }
}

/// Payload for auth state change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStateChangedPayload {
    pub account_id: AccountId,
    pub old_state: AuthState,
    pub new_state: AuthState,
}
