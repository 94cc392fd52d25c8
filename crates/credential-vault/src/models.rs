//! Account and credential types.

use campus_config_and_utils::RoutePreference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Length of a device identifier in hex characters.
pub const DEVICE_ID_LEN: usize = 32;

/// Stable account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which downstream systems an account uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Undergraduate,
    Graduate,
}

/// Metadata of a managed account. Never contains the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub username: String,
    pub kind: AccountKind,
    /// Visitor identifier presented to the identity provider.
    pub device_id: String,
    /// The identity provider has been told to trust `device_id`.
    #[serde(default)]
    pub trusted_client: bool,
    #[serde(default)]
    pub route: RoutePreference,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::CredentialVault::add_account`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub username: String,
    pub kind: AccountKind,
    pub route: RoutePreference,
}

impl NewAccount {
    pub fn new(username: impl Into<String>, kind: AccountKind) -> Self {
        let username = username.into();
        Self {
            display_name: username.clone(),
            username,
            kind,
            route: RoutePreference::default(),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn route(mut self, route: RoutePreference) -> Self {
        self.route = route;
        self
    }
}

/// Decrypted login credential, wiped from memory on drop.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub secret: Zeroizing<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Random 32-character lowercase hex visitor identifier.
pub fn generate_device_id() -> String {
    hex::encode(rand::random::<[u8; DEVICE_ID_LEN / 2]>())
}

pub fn is_valid_device_id(value: &str) -> bool {
    value.len() == DEVICE_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_device_id_is_valid() {
        for _ in 0..16 {
            let id = generate_device_id();
            assert!(is_valid_device_id(&id), "{id}");
        }
        assert_ne!(generate_device_id(), generate_device_id());
    }

    #[test]
    fn test_device_id_validation() {
        assert!(is_valid_device_id("0123456789abcdef0123456789abcdef"));
        assert!(!is_valid_device_id("0123456789ABCDEF0123456789ABCDEF"));
        assert!(!is_valid_device_id("0123456789abcdef"));
        assert!(!is_valid_device_id("g123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = Credential {
            username: "2220000001".to_string(),
            secret: Zeroizing::new("hunter2".to_string()),
        };
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("2220000001"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_account_id_serializes_transparently() {
        let id = AccountId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
