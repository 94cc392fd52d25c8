//! Key derivation and authenticated encryption for the secret table.

use crate::{VaultError, VaultResult};
use argon2::{Algorithm, Argon2, Params, Version};
use campus_config_and_utils::KdfSettings;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

const KDF_ALGORITHM: &str = "argon2id";
/// Binds ciphertexts to this file format.
const ASSOCIATED_DATA: &[u8] = b"campus-toolbox/vault/v1";

pub type VaultKey = Zeroizing<[u8; DERIVED_KEY_LEN]>;

/// Argon2id parameters recorded next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl From<KdfSettings> for KdfParams {
    fn from(settings: KdfSettings) -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            memory_kib: settings.memory_kib,
            iterations: settings.iterations,
            parallelism: settings.parallelism,
        }
    }
}

pub fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> VaultResult<VaultKey> {
    if params.algorithm != KDF_ALGORITHM {
        return Err(VaultError::Corrupt(format!(
            "unsupported kdf: {}",
            params.algorithm
        )));
    }
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| VaultError::Crypto(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| VaultError::Crypto(format!("argon2 derive: {e}")))?;
    Ok(key)
}

/// Encrypt under a fresh random nonce.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> VaultResult<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let nonce = generate_nonce();
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map_err(|e| VaultError::Crypto(format!("encrypt: {e}")))?;
    Ok((nonce, ciphertext))
}

/// Decrypt and authenticate. A tag mismatch means the key is wrong.
pub fn open(key: &VaultKey, nonce: &[u8], ciphertext: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN {
        return Err(VaultError::Corrupt("nonce has wrong length".to_string()));
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| VaultError::WrongPassword)
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
pub(crate) fn fast_params() -> KdfParams {
    KdfParams::from(KdfSettings {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic_per_salt() {
        let params = fast_params();
        let salt = generate_salt();
        let a = derive_key("pw", &salt, &params).unwrap();
        let b = derive_key("pw", &salt, &params).unwrap();
        let c = derive_key("pw", &generate_salt(), &params).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_seal_open_with_wrong_key_is_wrong_password() {
        let params = fast_params();
        let salt = generate_salt();
        let key = derive_key("right", &salt, &params).unwrap();
        let other = derive_key("wrong", &salt, &params).unwrap();

        let (nonce, ct) = seal(&key, b"{\"a\":\"b\"}").unwrap();
        assert_eq!(&*open(&key, &nonce, &ct).unwrap(), b"{\"a\":\"b\"}");
        assert!(matches!(
            open(&other, &nonce, &ct),
            Err(VaultError::WrongPassword)
        ));
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = derive_key("pw", &generate_salt(), &fast_params()).unwrap();
        let (n1, c1) = seal(&key, b"same").unwrap();
        let (n2, c2) = seal(&key, b"same").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_unknown_kdf_rejected() {
        let mut params = fast_params();
        params.algorithm = "md5".to_string();
        assert!(matches!(
            derive_key("pw", &generate_salt(), &params),
            Err(VaultError::Corrupt(_))
        ));
    }
}
