//! Authentication error types.

use crate::challenge::VerificationChallenge;
use crate::classifier::RawOutcome;
use credential_vault::VaultError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error taxonomy shared by login, session and task code.
///
/// Every surfaced failure maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No connectivity or the request timed out.
    NetworkError,
    /// 5xx or a response that could not be understood.
    ServerError,
    RateLimited,
    /// The identity provider wants a one-time code.
    AuthChallengeRequired,
    InvalidCredentials,
    WrongPassword,
    VaultLocked,
    TunnelUnavailable,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Kinds that may succeed when tried again later.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError | ErrorKind::ServerError | ErrorKind::RateLimited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthChallengeRequired => "auth_challenge_required",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::WrongPassword => "wrong_password",
            ErrorKind::VaultLocked => "vault_locked",
            ErrorKind::TunnelUnavailable => "tunnel_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw outcome together with the kind it was classified as.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {outcome}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub outcome: RawOutcome,
    /// Attempts made before giving up.
    pub attempts: u32,
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No connectivity or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// 5xx or unparseable response
    #[error("Server error: {0}")]
    Server(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The identity provider asked for a verification code
    #[error("Verification required for account {}", .0.account_id)]
    ChallengeRequired(VerificationChallenge),

    /// Username or password rejected
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Verification code rejected; the challenge stays open
    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification challenge expired")]
    ChallengeExpired,

    /// The challenge was dropped before anyone answered it
    #[error("Verification not completed: {0}")]
    ChallengeAbandoned(String),

    #[error("Unknown verification challenge: {0}")]
    UnknownChallenge(String),

    /// Code was requested again too soon
    #[error("Verification code can be resent in {}s", .0.as_secs())]
    ResendCooldown(Duration),

    #[error("Tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    /// The account has no stored credentials
    #[error("Account not configured: {0}")]
    NotConfigured(String),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// The taxonomy kind this error surfaces as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Network(_) => ErrorKind::NetworkError,
            AuthError::Server(_) => ErrorKind::ServerError,
            AuthError::RateLimited(_) | AuthError::ResendCooldown(_) => ErrorKind::RateLimited,
            AuthError::ChallengeRequired(_)
            | AuthError::InvalidCode
            | AuthError::ChallengeAbandoned(_) => ErrorKind::AuthChallengeRequired,
            AuthError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            AuthError::TunnelUnavailable(_) => ErrorKind::TunnelUnavailable,
            AuthError::Vault(VaultError::WrongPassword) => ErrorKind::WrongPassword,
            AuthError::Vault(VaultError::VaultLocked) => ErrorKind::VaultLocked,
            AuthError::Cancelled => ErrorKind::Cancelled,
            AuthError::ChallengeExpired
            | AuthError::UnknownChallenge(_)
            | AuthError::NotConfigured(_)
            | AuthError::Vault(_)
            | AuthError::InvalidStateTransition(_)
            | AuthError::Config(_)
            | AuthError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl AuthError {
    /// Build the error a failure of `kind` surfaces as.
    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::NetworkError => AuthError::Network(detail),
            ErrorKind::ServerError => AuthError::Server(detail),
            ErrorKind::RateLimited => AuthError::RateLimited(detail),
            ErrorKind::InvalidCredentials => AuthError::InvalidCredentials(detail),
            ErrorKind::TunnelUnavailable => AuthError::TunnelUnavailable(detail),
            ErrorKind::Cancelled => AuthError::Cancelled,
            ErrorKind::WrongPassword => AuthError::Vault(VaultError::WrongPassword),
            ErrorKind::VaultLocked => AuthError::Vault(VaultError::VaultLocked),
            // No challenge object to hand out, only the fact that one was needed.
            ErrorKind::AuthChallengeRequired => AuthError::ChallengeAbandoned(detail),
            ErrorKind::Unknown => AuthError::Unknown(detail),
        }
    }
}

impl From<ClassifiedError> for AuthError {
    fn from(err: ClassifiedError) -> Self {
        AuthError::from_kind(err.kind, err.outcome.to_string())
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_network() {
        assert!(AuthError::Network("reset".into()).is_transient());
        assert!(AuthError::Server("502".into()).is_transient());
        assert!(AuthError::RateLimited("slow down".into()).is_transient());
    }

    #[test]
    fn test_is_transient_terminal_errors() {
        assert!(!AuthError::InvalidCredentials("bad".into()).is_transient());
        assert!(!AuthError::InvalidCode.is_transient());
        assert!(!AuthError::ChallengeExpired.is_transient());
        assert!(!AuthError::Cancelled.is_transient());
        assert!(!AuthError::Vault(VaultError::VaultLocked).is_transient());
    }

    #[test]
    fn test_vault_errors_keep_their_kind() {
        assert_eq!(
            AuthError::Vault(VaultError::WrongPassword).kind(),
            ErrorKind::WrongPassword
        );
        assert_eq!(
            AuthError::Vault(VaultError::VaultLocked).kind(),
            ErrorKind::VaultLocked
        );
        assert_eq!(
            AuthError::Vault(VaultError::VaultEmpty).kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_classified_error_converts_by_kind() {
        let err = ClassifiedError {
            kind: ErrorKind::NetworkError,
            outcome: RawOutcome::Transport {
                timeout: true,
                connect: false,
                detail: "deadline elapsed".into(),
            },
            attempts: 3,
        };
        let auth: AuthError = err.into();
        assert_eq!(auth.kind(), ErrorKind::NetworkError);
        assert!(auth.to_string().contains("deadline elapsed"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AuthChallengeRequired).unwrap(),
            "\"auth_challenge_required\""
        );
        assert_eq!(ErrorKind::TunnelUnavailable.to_string(), "tunnel_unavailable");
    }
}
