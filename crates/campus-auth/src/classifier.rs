//! Maps raw call outcomes onto the error taxonomy.

use crate::error::ErrorKind;
use std::fmt;

/// Business code the identity provider uses for "second factor required".
pub const BUSINESS_CODE_CHALLENGE: i64 = 102;

/// What a failed remote call looked like before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// The request never produced a response.
    Transport {
        timeout: bool,
        connect: bool,
        detail: String,
    },
    /// Non-success HTTP status.
    Http { status: u16, detail: String },
    /// HTTP success carrying an application level error code.
    Business { code: i64, detail: String },
    /// A response body that could not be parsed.
    Malformed(String),
    /// The service bounced the call back to the login page.
    AuthLost(String),
}

impl RawOutcome {
    pub fn transport(detail: impl Into<String>) -> Self {
        RawOutcome::Transport {
            timeout: false,
            connect: false,
            detail: detail.into(),
        }
    }

    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        RawOutcome::Http {
            status,
            detail: detail.into(),
        }
    }

    pub fn is_auth_lost(&self) -> bool {
        matches!(self, RawOutcome::AuthLost(_))
    }
}

impl fmt::Display for RawOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawOutcome::Transport {
                timeout: true,
                detail,
                ..
            } => write!(f, "request timed out: {detail}"),
            RawOutcome::Transport {
                connect: true,
                detail,
                ..
            } => write!(f, "connection failed: {detail}"),
            RawOutcome::Transport { detail, .. } => write!(f, "transport error: {detail}"),
            RawOutcome::Http { status, detail } => write!(f, "HTTP {status}: {detail}"),
            RawOutcome::Business { code, detail } => write!(f, "code {code}: {detail}"),
            RawOutcome::Malformed(detail) => write!(f, "malformed response: {detail}"),
            RawOutcome::AuthLost(detail) => write!(f, "authentication lost: {detail}"),
        }
    }
}

impl From<reqwest::Error> for RawOutcome {
    fn from(err: reqwest::Error) -> Self {
        let detail = err.to_string();
        if let Some(status) = err.status() {
            return RawOutcome::Http {
                status: status.as_u16(),
                detail,
            };
        }
        if err.is_decode() {
            return RawOutcome::Malformed(detail);
        }
        RawOutcome::Transport {
            timeout: err.is_timeout(),
            connect: err.is_connect(),
            detail,
        }
    }
}

/// Classify a raw outcome into exactly one [`ErrorKind`].
///
/// Auth-lost signals come out as `Unknown`; callers that can re-authenticate
/// check [`RawOutcome::is_auth_lost`] before classifying.
pub fn classify(outcome: &RawOutcome) -> ErrorKind {
    match outcome {
        RawOutcome::Transport { .. } => ErrorKind::NetworkError,
        RawOutcome::Http { status, .. } => match *status {
            401 | 403 => ErrorKind::InvalidCredentials,
            408 => ErrorKind::NetworkError,
            428 => ErrorKind::AuthChallengeRequired,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        },
        RawOutcome::Business { code, .. } if *code == BUSINESS_CODE_CHALLENGE => {
            ErrorKind::AuthChallengeRequired
        }
        RawOutcome::Business { .. } => ErrorKind::Unknown,
        RawOutcome::Malformed(_) => ErrorKind::ServerError,
        RawOutcome::AuthLost(_) => ErrorKind::Unknown,
    }
}
