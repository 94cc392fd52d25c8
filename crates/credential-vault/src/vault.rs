//! The credential vault.
//!
//! All operations serialize on one mutex, so at most one mutation runs at a
//! time. Every mutation builds the next state, persists it, and only then
//! swaps it in: a failed write leaves both memory and disk on the old state.

use crate::artifacts::AccountArtifacts;
use crate::crypto::{self, KdfParams, VaultKey};
use crate::models::{generate_device_id, is_valid_device_id};
use crate::store::VaultStore;
use crate::{Account, AccountId, Credential, NewAccount, VaultError, VaultResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use campus_config_and_utils::{KdfSettings, RoutePreference};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

/// Version written into every persisted vault.
pub const VAULT_FORMAT_VERSION: u32 = 1;

/// Observable vault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// Encryption disabled; secrets always available.
    Plaintext,
    /// Encrypted and no key in memory.
    Locked,
    /// Encrypted and the master password has been verified.
    Unlocked,
}

type SecretTable = BTreeMap<AccountId, Zeroizing<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// On-disk layout.
#[derive(Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    #[serde(default)]
    current: Option<AccountId>,
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    encryption: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secrets: Option<BTreeMap<AccountId, String>>,
}

impl Drop for VaultFile {
    fn drop(&mut self) {
        if let Some(secrets) = self.secrets.as_mut() {
            secrets.values_mut().for_each(Zeroize::zeroize);
        }
    }
}

#[derive(Clone)]
struct Sealed {
    kdf: KdfParams,
    salt: Vec<u8>,
    /// Last persisted envelope; `None` only before the first save.
    envelope: Option<Envelope>,
    key: Option<VaultKey>,
}

#[derive(Clone, Default)]
struct Inner {
    accounts: Vec<Account>,
    current: Option<AccountId>,
    sealed: Option<Sealed>,
    /// Present when plaintext or unlocked.
    secrets: Option<SecretTable>,
}

impl Inner {
    fn state(&self) -> VaultState {
        match (&self.sealed, &self.secrets) {
            (None, _) => VaultState::Plaintext,
            (Some(_), Some(_)) => VaultState::Unlocked,
            (Some(_), None) => VaultState::Locked,
        }
    }

    fn position(&self, id: &AccountId) -> VaultResult<usize> {
        self.accounts
            .iter()
            .position(|account| &account.id == id)
            .ok_or_else(|| VaultError::AccountNotFound(id.clone()))
    }

    fn account_mut(&mut self, id: &AccountId) -> VaultResult<&mut Account> {
        let index = self.position(id)?;
        Ok(&mut self.accounts[index])
    }

    fn secrets_mut(&mut self) -> VaultResult<&mut SecretTable> {
        self.secrets.as_mut().ok_or(VaultError::VaultLocked)
    }

    /// Drop secrets whose account was removed while the vault was locked.
    fn prune_orphans(&mut self) {
        let Inner {
            accounts, secrets, ..
        } = self;
        if let Some(secrets) = secrets.as_mut() {
            secrets.retain(|id, _| accounts.iter().any(|account| &account.id == id));
        }
    }
}

/// Encrypted store of every account's credentials under one master password.
pub struct CredentialVault {
    inner: Mutex<Inner>,
    store: Arc<dyn VaultStore>,
    artifacts: Arc<dyn AccountArtifacts>,
    kdf: KdfParams,
}

impl CredentialVault {
    /// Load the vault from `store`. A store with nothing saved yields an
    /// empty plaintext vault; an encrypted vault opens locked.
    ///
    /// `kdf` applies to keys derived from now on; existing envelopes keep
    /// the parameters they were written with until the password changes.
    pub fn open(
        store: Arc<dyn VaultStore>,
        artifacts: Arc<dyn AccountArtifacts>,
        kdf: KdfSettings,
    ) -> VaultResult<Self> {
        let inner = match store.load()? {
            Some(bytes) => parse_file(&bytes)?,
            None => Inner {
                secrets: Some(SecretTable::new()),
                ..Inner::default()
            },
        };

        debug!(
            accounts = inner.accounts.len(),
            state = ?inner.state(),
            "Vault opened"
        );

        Ok(Self {
            inner: Mutex::new(inner),
            store,
            artifacts,
            kdf: kdf.into(),
        })
    }

    pub fn state(&self) -> VaultState {
        self.inner.lock().state()
    }

    pub fn is_encrypted(&self) -> bool {
        self.inner.lock().sealed.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.state() == VaultState::Locked
    }

    /// Verify `master_password` and make secrets available.
    ///
    /// A vault that has never held an account fails with `VaultEmpty`.
    /// A plaintext vault with accounts has nothing to decrypt and succeeds.
    pub fn unlock(&self, master_password: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();

        let Some(sealed) = inner.sealed.as_ref() else {
            if inner.accounts.is_empty() {
                return Err(VaultError::VaultEmpty);
            }
            return Ok(());
        };
        let Some(envelope) = sealed.envelope.as_ref() else {
            return Err(VaultError::VaultEmpty);
        };

        let key = crypto::derive_key(master_password, &sealed.salt, &sealed.kdf)?;
        let secrets = match open_envelope(&key, envelope) {
            Ok(secrets) => secrets,
            Err(err) => {
                warn!("Vault unlock rejected");
                return Err(err);
            }
        };

        if let Some(sealed) = inner.sealed.as_mut() {
            sealed.key = Some(key);
        }
        inner.secrets = Some(secrets);
        inner.prune_orphans();

        info!(accounts = inner.accounts.len(), "Vault unlocked");
        Ok(())
    }

    /// Discard decrypted secrets and the derived key. Idempotent.
    pub fn lock(&self) {
        let mut inner = self.inner.lock();
        let Some(sealed) = inner.sealed.as_mut() else {
            return;
        };
        if sealed.key.take().is_some() {
            inner.secrets = None;
            info!("Vault locked");
        }
    }

    /// Snapshot of all account metadata, in insertion order.
    pub fn accounts(&self) -> Vec<Account> {
        self.inner.lock().accounts.clone()
    }

    pub fn account(&self, id: &AccountId) -> VaultResult<Account> {
        let inner = self.inner.lock();
        let index = inner.position(id)?;
        Ok(inner.accounts[index].clone())
    }

    /// Add an account. Fails with `VaultLocked` while an encrypted vault is
    /// locked. The first account added becomes the current one.
    pub fn add_account(&self, new: NewAccount, secret: &str) -> VaultResult<Account> {
        let mut inner = self.inner.lock();
        if inner.state() == VaultState::Locked {
            return Err(VaultError::VaultLocked);
        }

        let account = Account {
            id: AccountId::generate(),
            display_name: new.display_name,
            username: new.username,
            kind: new.kind,
            device_id: generate_device_id(),
            trusted_client: false,
            route: new.route,
            created_at: chrono::Utc::now(),
        };

        let mut next = inner.clone();
        next.accounts.push(account.clone());
        next.secrets_mut()?
            .insert(account.id.clone(), Zeroizing::new(secret.to_string()));
        if next.current.is_none() {
            next.current = Some(account.id.clone());
        }
        self.commit(&mut inner, next)?;

        info!(account_id = %account.id, kind = ?account.kind, "Account added");
        Ok(account)
    }

    /// Remove an account and purge its cached artifacts.
    ///
    /// Returns whether the account existed. Removing an unknown id succeeds.
    /// Allowed while locked; the orphaned secret is dropped on next unlock.
    pub fn remove_account(&self, id: &AccountId) -> VaultResult<bool> {
        let existed = {
            let mut inner = self.inner.lock();
            match inner.position(id) {
                Ok(index) => {
                    let mut next = inner.clone();
                    next.accounts.remove(index);
                    if let Some(secrets) = next.secrets.as_mut() {
                        secrets.remove(id);
                    }
                    if next.current.as_ref() == Some(id) {
                        next.current = next.accounts.first().map(|account| account.id.clone());
                    }
                    self.commit(&mut inner, next)?;
                    true
                }
                Err(_) => false,
            }
        };

        if let Err(err) = self.artifacts.purge(id) {
            warn!(account_id = %id, error = %err, "Failed to purge account artifacts");
        }

        if existed {
            info!(account_id = %id, "Account removed");
        }
        Ok(existed)
    }

    pub fn rename_account(&self, id: &AccountId, display_name: &str) -> VaultResult<()> {
        self.mutate_account(id, |account| {
            account.display_name = display_name.to_string();
            Ok(())
        })
    }

    pub fn set_route(&self, id: &AccountId, route: RoutePreference) -> VaultResult<()> {
        self.mutate_account(id, |account| {
            account.route = route;
            Ok(())
        })
    }

    /// Replace the stored secret of an account. Needs secrets to be available.
    pub fn update_secret(&self, id: &AccountId, secret: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        inner.position(id)?;
        let mut next = inner.clone();
        next.secrets_mut()?
            .insert(id.clone(), Zeroizing::new(secret.to_string()));
        self.commit(&mut inner, next)?;
        info!(account_id = %id, "Account secret updated");
        Ok(())
    }

    /// Decrypted credential for login.
    pub fn credential(&self, id: &AccountId) -> VaultResult<Credential> {
        let inner = self.inner.lock();
        let index = inner.position(id)?;
        let secrets = inner.secrets.as_ref().ok_or(VaultError::VaultLocked)?;
        let secret = secrets
            .get(id)
            .ok_or_else(|| VaultError::Corrupt(format!("no secret stored for {id}")))?;
        Ok(Credential {
            username: inner.accounts[index].username.clone(),
            secret: secret.clone(),
        })
    }

    /// Replace the visitor identifier and clear the trust flag.
    ///
    /// Generates a random identifier when `new_device_id` is `None`.
    pub fn reset_device_identity(
        &self,
        id: &AccountId,
        new_device_id: Option<&str>,
    ) -> VaultResult<String> {
        let device_id = match new_device_id {
            Some(value) if is_valid_device_id(value) => value.to_string(),
            Some(value) => return Err(VaultError::InvalidDeviceId(value.to_string())),
            None => generate_device_id(),
        };
        self.mutate_account(id, |account| {
            account.device_id = device_id.clone();
            account.trusted_client = false;
            Ok(())
        })?;
        info!(account_id = %id, "Device identity reset");
        Ok(device_id)
    }

    /// Record whether the identity provider trusts the account's device.
    pub fn set_trusted(&self, id: &AccountId, trusted: bool) -> VaultResult<()> {
        self.mutate_account(id, |account| {
            account.trusted_client = trusted;
            Ok(())
        })
    }

    pub fn current(&self) -> Option<Account> {
        let inner = self.inner.lock();
        let current = inner.current.as_ref()?;
        inner
            .accounts
            .iter()
            .find(|account| &account.id == current)
            .cloned()
    }

    pub fn set_current(&self, id: &AccountId) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        inner.position(id)?;
        let mut next = inner.clone();
        next.current = Some(id.clone());
        self.commit(&mut inner, next)
    }

    /// Encrypt the secret table under `master_password`. The vault stays
    /// unlocked afterwards.
    pub fn enable_encryption(&self, master_password: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        if inner.sealed.is_some() {
            return Err(VaultError::EncryptionEnabled);
        }

        let salt = crypto::generate_salt().to_vec();
        let key = crypto::derive_key(master_password, &salt, &self.kdf)?;

        let mut next = inner.clone();
        next.sealed = Some(Sealed {
            kdf: self.kdf.clone(),
            salt,
            envelope: None,
            key: Some(key),
        });
        self.commit(&mut inner, next)?;

        info!("Vault encryption enabled");
        Ok(())
    }

    /// Toggle encryption. Disabling needs an unlocked vault; enabling needs
    /// a master password. Setting the current value again is a no-op.
    pub fn set_encryption_enabled(
        &self,
        enabled: bool,
        master_password: Option<&str>,
    ) -> VaultResult<()> {
        if enabled {
            if self.is_encrypted() {
                return Ok(());
            }
            let password = master_password.ok_or(VaultError::PasswordRequired)?;
            return self.enable_encryption(password);
        }

        let mut inner = self.inner.lock();
        match inner.state() {
            VaultState::Plaintext => Ok(()),
            VaultState::Locked => Err(VaultError::VaultLocked),
            VaultState::Unlocked => {
                let mut next = inner.clone();
                next.sealed = None;
                self.commit(&mut inner, next)?;
                info!("Vault encryption disabled");
                Ok(())
            }
        }
    }

    /// Re-encrypt under a new password with a fresh salt and nonce.
    ///
    /// `old_password` is verified against the persisted envelope whether or
    /// not the vault is unlocked. On success the vault is unlocked under the
    /// new key; on any failure nothing changes.
    pub fn change_master_password(&self, old_password: &str, new_password: &str) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        let sealed = inner.sealed.as_ref().ok_or(VaultError::EncryptionDisabled)?;

        let verified = match sealed.envelope.as_ref() {
            Some(envelope) => {
                let old_key = crypto::derive_key(old_password, &sealed.salt, &sealed.kdf)?;
                open_envelope(&old_key, envelope)?
            }
            None => return Err(VaultError::VaultEmpty),
        };

        let salt = crypto::generate_salt().to_vec();
        let key = crypto::derive_key(new_password, &salt, &self.kdf)?;

        let mut next = inner.clone();
        next.secrets = Some(verified);
        next.prune_orphans();
        next.sealed = Some(Sealed {
            kdf: self.kdf.clone(),
            salt,
            envelope: None,
            key: Some(key),
        });
        self.commit(&mut inner, next)?;

        info!("Vault master password changed");
        Ok(())
    }

    fn mutate_account(
        &self,
        id: &AccountId,
        apply: impl FnOnce(&mut Account) -> VaultResult<()>,
    ) -> VaultResult<()> {
        let mut inner = self.inner.lock();
        let mut next = inner.clone();
        apply(next.account_mut(id)?)?;
        self.commit(&mut inner, next)
    }

    /// Persist `next`, then make it the in-memory state.
    fn commit(&self, current: &mut Inner, mut next: Inner) -> VaultResult<()> {
        let file = to_file(&mut next)?;
        let bytes = Zeroizing::new(serde_json::to_vec_pretty(&file)?);
        self.store.save(&bytes)?;
        *current = next;
        Ok(())
    }
}

fn parse_file(bytes: &[u8]) -> VaultResult<Inner> {
    let mut file: VaultFile = serde_json::from_slice(bytes)?;
    if file.version > VAULT_FORMAT_VERSION {
        return Err(VaultError::Corrupt(format!(
            "unsupported vault version {}",
            file.version
        )));
    }

    let accounts = std::mem::take(&mut file.accounts);
    let current = file.current.take();

    let (sealed, secrets) = match (file.encryption.take(), file.secrets.take()) {
        (Some(_), Some(_)) => {
            return Err(VaultError::Corrupt(
                "vault holds both encrypted and plaintext secrets".to_string(),
            ))
        }
        (Some(envelope), None) => {
            let salt = BASE64
                .decode(&envelope.salt)
                .map_err(|e| VaultError::Corrupt(format!("salt: {e}")))?;
            let sealed = Sealed {
                kdf: envelope.kdf.clone(),
                salt,
                envelope: Some(envelope),
                key: None,
            };
            (Some(sealed), None)
        }
        (None, plaintext) => {
            let secrets = plaintext
                .unwrap_or_default()
                .into_iter()
                .map(|(id, secret)| (id, Zeroizing::new(secret)))
                .collect();
            (None, Some(secrets))
        }
    };

    Ok(Inner {
        accounts,
        current,
        sealed,
        secrets,
    })
}

/// Build the persisted form, resealing secrets under a fresh nonce when the
/// key is at hand.
fn to_file(inner: &mut Inner) -> VaultResult<VaultFile> {
    let mut file = VaultFile {
        version: VAULT_FORMAT_VERSION,
        current: inner.current.clone(),
        accounts: inner.accounts.clone(),
        encryption: None,
        secrets: None,
    };

    match inner.sealed.as_mut() {
        Some(sealed) => {
            if let (Some(key), Some(secrets)) = (sealed.key.as_ref(), inner.secrets.as_ref()) {
                let plaintext = secrets_to_json(secrets)?;
                let (nonce, ciphertext) = crypto::seal(key, &plaintext)?;
                sealed.envelope = Some(Envelope {
                    kdf: sealed.kdf.clone(),
                    salt: BASE64.encode(&sealed.salt),
                    nonce: BASE64.encode(nonce),
                    ciphertext: BASE64.encode(ciphertext),
                });
            }
            let envelope = sealed
                .envelope
                .clone()
                .ok_or(VaultError::VaultLocked)?;
            file.encryption = Some(envelope);
        }
        None => {
            let secrets = inner.secrets.as_ref().ok_or(VaultError::VaultLocked)?;
            file.secrets = Some(
                secrets
                    .iter()
                    .map(|(id, secret)| (id.clone(), secret.as_str().to_string()))
                    .collect(),
            );
        }
    }

    Ok(file)
}

fn secrets_to_json(secrets: &SecretTable) -> VaultResult<Zeroizing<Vec<u8>>> {
    let borrowed: BTreeMap<&str, &str> = secrets
        .iter()
        .map(|(id, secret)| (id.as_str(), secret.as_str()))
        .collect();
    Ok(Zeroizing::new(serde_json::to_vec(&borrowed)?))
}

fn open_envelope(key: &VaultKey, envelope: &Envelope) -> VaultResult<SecretTable> {
    let nonce = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| VaultError::Corrupt(format!("nonce: {e}")))?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| VaultError::Corrupt(format!("ciphertext: {e}")))?;

    let plaintext = crypto::open(key, &nonce, &ciphertext)?;
    let decoded: BTreeMap<AccountId, String> = serde_json::from_slice(&plaintext)
        .map_err(|e| VaultError::Corrupt(format!("secret table: {e}")))?;
    Ok(decoded
        .into_iter()
        .map(|(id, secret)| (id, Zeroizing::new(secret)))
        .collect())
}
