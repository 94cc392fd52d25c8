//! Step-up verification challenges.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use credential_vault::AccountId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Where the one-time code is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryChannel {
    Sms { masked_destination: String },
    Email { masked_destination: String },
    /// The code is the text shown in an image, base64 encoded.
    Captcha { image: String },
    Other,
}

impl DeliveryChannel {
    pub fn captcha(image: &[u8]) -> Self {
        DeliveryChannel::Captcha {
            image: BASE64.encode(image),
        }
    }

    pub fn is_captcha(&self) -> bool {
        matches!(self, DeliveryChannel::Captcha { .. })
    }

    /// Decoded captcha image, `None` for other channels.
    pub fn captcha_image(&self) -> Option<Vec<u8>> {
        match self {
            DeliveryChannel::Captcha { image } => BASE64.decode(image).ok(),
            _ => None,
        }
    }
}

/// An open request for a one-time code.
///
/// Whether to trust this client afterwards is chosen by whoever answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub id: String,
    pub account_id: AccountId,
    pub channel: DeliveryChannel,
    /// Number of ASCII digits the code consists of. For a captcha, the
    /// longest answer accepted.
    pub code_length: usize,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationChallenge {
    pub fn new(
        account_id: AccountId,
        channel: DeliveryChannel,
        code_length: usize,
        ttl: Duration,
    ) -> Self {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            channel,
            code_length,
            issued_at,
            expires_at: issued_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left until expiry, zero when already expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// True when `code` has the expected shape. Says nothing about whether
    /// the provider will accept it.
    pub fn accepts_format(&self, code: &str) -> bool {
        if self.channel.is_captcha() {
            return (1..=self.code_length).contains(&code.len())
                && code.bytes().all(|b| b.is_ascii_alphanumeric());
        }
        code.len() == self.code_length && code.bytes().all(|b| b.is_ascii_digit())
    }
}
