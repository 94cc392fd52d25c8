mod harness;

use crate::{AccountId, DataDirArtifacts, VaultError, VaultState};
use harness::{undergrad, VaultHarness};
use std::collections::BTreeMap;
use std::sync::Arc;

fn secrets_of(vault: &crate::CredentialVault) -> BTreeMap<String, String> {
    vault
        .accounts()
        .iter()
        .map(|account| {
            let credential = vault.credential(&account.id).unwrap();
            (credential.username.clone(), credential.secret.to_string())
        })
        .collect()
}

#[test]
fn test_plaintext_vault_adds_without_unlock() {
    let h = VaultHarness::new();
    assert_eq!(h.vault.state(), VaultState::Plaintext);

    let account = h.vault.add_account(undergrad("2220000001"), "pw-1").unwrap();

    assert_eq!(h.vault.accounts().len(), 1);
    assert_eq!(h.vault.current().unwrap().id, account.id);
    assert_eq!(&*h.vault.credential(&account.id).unwrap().secret, "pw-1");
}

#[test]
fn test_unlock_never_populated_vault_is_empty() {
    let h = VaultHarness::new();
    assert!(matches!(h.vault.unlock("anything"), Err(VaultError::VaultEmpty)));
}

#[test]
fn test_plaintext_unlock_with_accounts_is_noop() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.unlock("whatever").unwrap();
    assert_eq!(h.vault.state(), VaultState::Plaintext);
}

#[test]
fn test_round_trip_through_lock_and_reopen() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.add_account(undergrad("u2"), "s2").unwrap();
    h.vault.enable_encryption("master").unwrap();
    let before = secrets_of(&h.vault);

    h.vault.lock();
    assert_eq!(h.vault.state(), VaultState::Locked);
    h.vault.unlock("master").unwrap();
    assert_eq!(secrets_of(&h.vault), before);

    let reopened = h.reopen();
    assert_eq!(reopened.state(), VaultState::Locked);
    assert_eq!(reopened.accounts().len(), 2);
    reopened.unlock("master").unwrap();
    assert_eq!(secrets_of(&reopened), before);
}

#[test]
fn test_wrong_password_keeps_vault_locked() {
    let h = VaultHarness::new();
    let account = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("right").unwrap();
    h.vault.lock();

    for attempt in ["", "Right", "right ", "wrong"] {
        assert!(matches!(h.vault.unlock(attempt), Err(VaultError::WrongPassword)));
        assert_eq!(h.vault.state(), VaultState::Locked);
    }
    assert!(matches!(
        h.vault.credential(&account.id),
        Err(VaultError::VaultLocked)
    ));
}

#[test]
fn test_add_account_while_locked_fails() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("master").unwrap();
    h.vault.lock();

    assert!(matches!(
        h.vault.add_account(undergrad("u2"), "s2"),
        Err(VaultError::VaultLocked)
    ));
    assert_eq!(h.vault.accounts().len(), 1);
}

#[test]
fn test_lock_is_idempotent() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.lock();
    assert_eq!(h.vault.state(), VaultState::Plaintext);

    h.vault.enable_encryption("master").unwrap();
    h.vault.lock();
    h.vault.lock();
    assert_eq!(h.vault.state(), VaultState::Locked);
}

#[test]
fn test_encrypted_file_hides_secrets_but_not_metadata() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("2220000001"), "very-secret").unwrap();
    h.vault.enable_encryption("master").unwrap();

    let raw = String::from_utf8(h.store.contents().unwrap()).unwrap();
    assert!(!raw.contains("very-secret"));
    assert!(raw.contains("2220000001"));

    let json = h.persisted_json();
    assert_eq!(json["encryption"]["kdf"]["algorithm"], "argon2id");
    assert!(json.get("secrets").is_none());
}

#[test]
fn test_every_save_uses_fresh_nonce() {
    let h = VaultHarness::new();
    let account = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("master").unwrap();
    let first = h.persisted_json()["encryption"]["nonce"].clone();

    h.vault.rename_account(&account.id, "Renamed").unwrap();
    let second = h.persisted_json()["encryption"]["nonce"].clone();

    assert_ne!(first, second);
}

#[test]
fn test_change_master_password() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("old").unwrap();
    let salt_before = h.persisted_json()["encryption"]["salt"].clone();

    h.vault.change_master_password("old", "new").unwrap();
    assert_ne!(h.persisted_json()["encryption"]["salt"], salt_before);

    let reopened = h.reopen();
    assert!(matches!(reopened.unlock("old"), Err(VaultError::WrongPassword)));
    reopened.unlock("new").unwrap();
    assert_eq!(secrets_of(&reopened)["u1"], "s1");
}

#[test]
fn test_change_master_password_verifies_old_even_when_unlocked() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("old").unwrap();
    let bytes_before = h.store.contents();

    assert!(matches!(
        h.vault.change_master_password("not-old", "new"),
        Err(VaultError::WrongPassword)
    ));
    assert_eq!(h.store.contents(), bytes_before);
    assert_eq!(h.vault.state(), VaultState::Unlocked);
}

#[test]
fn test_change_master_password_from_locked_state() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("old").unwrap();
    h.vault.lock();

    h.vault.change_master_password("old", "new").unwrap();

    assert_eq!(h.vault.state(), VaultState::Unlocked);
    assert_eq!(secrets_of(&h.vault)["u1"], "s1");
}

#[test]
fn test_failed_write_leaves_state_untouched() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("old").unwrap();
    let bytes_before = h.store.contents();

    h.store.set_fail_saves(true);
    assert!(matches!(
        h.vault.change_master_password("old", "new"),
        Err(VaultError::Io(_))
    ));
    assert!(h.vault.add_account(undergrad("u2"), "s2").is_err());
    h.store.set_fail_saves(false);

    assert_eq!(h.store.contents(), bytes_before);
    assert_eq!(h.vault.accounts().len(), 1);
    h.vault.lock();
    h.vault.unlock("old").unwrap();
}

#[test]
fn test_disable_encryption_requires_unlock() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.set_encryption_enabled(true, Some("master")).unwrap();
    h.vault.lock();

    assert!(matches!(
        h.vault.set_encryption_enabled(false, None),
        Err(VaultError::VaultLocked)
    ));

    h.vault.unlock("master").unwrap();
    h.vault.set_encryption_enabled(false, None).unwrap();
    assert_eq!(h.vault.state(), VaultState::Plaintext);

    let json = h.persisted_json();
    assert!(json["encryption"].is_null());
    assert_eq!(h.reopen().state(), VaultState::Plaintext);
}

#[test]
fn test_enable_encryption_needs_password() {
    let h = VaultHarness::new();
    h.vault.add_account(undergrad("u1"), "s1").unwrap();
    assert!(matches!(
        h.vault.set_encryption_enabled(true, None),
        Err(VaultError::PasswordRequired)
    ));
    h.vault.enable_encryption("a").unwrap();
    assert!(matches!(
        h.vault.enable_encryption("b"),
        Err(VaultError::EncryptionEnabled)
    ));
}

#[test]
fn test_remove_account_is_idempotent_and_purges_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(DataDirArtifacts::new(dir.path()));
    let h = VaultHarness::with_artifacts(artifacts.clone());

    let first = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    let second = h.vault.add_account(undergrad("u2"), "s2").unwrap();
    std::fs::create_dir_all(artifacts.dir_for(&first.id)).unwrap();
    std::fs::write(artifacts.dir_for(&first.id).join("schedule.json"), "[]").unwrap();

    assert!(h.vault.remove_account(&first.id).unwrap());
    assert!(!artifacts.dir_for(&first.id).exists());
    assert_eq!(h.vault.current().unwrap().id, second.id);

    assert!(!h.vault.remove_account(&first.id).unwrap());
    assert!(!h.vault.remove_account(&AccountId::from("unknown")).unwrap());
    assert_eq!(h.vault.accounts().len(), 1);
}

#[test]
fn test_remove_while_locked_prunes_secret_on_unlock() {
    let h = VaultHarness::new();
    let gone = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.add_account(undergrad("u2"), "s2").unwrap();
    h.vault.enable_encryption("master").unwrap();
    h.vault.lock();

    assert!(h.vault.remove_account(&gone.id).unwrap());
    h.vault.unlock("master").unwrap();
    assert_eq!(secrets_of(&h.vault).len(), 1);

    h.vault.rename_account(&h.vault.accounts()[0].id, "keep").unwrap();
    let reopened = h.reopen();
    reopened.unlock("master").unwrap();
    assert_eq!(
        secrets_of(&reopened).into_keys().collect::<Vec<_>>(),
        vec!["u2".to_string()]
    );
}

#[test]
fn test_encrypted_vault_without_accounts_still_unlocks() {
    let h = VaultHarness::new();
    let account = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("master").unwrap();
    h.vault.remove_account(&account.id).unwrap();
    h.vault.lock();

    assert!(matches!(h.vault.unlock("nope"), Err(VaultError::WrongPassword)));
    h.vault.unlock("master").unwrap();
    h.vault.add_account(undergrad("u2"), "s2").unwrap();
}

#[test]
fn test_metadata_mutations_allowed_while_locked() {
    let h = VaultHarness::new();
    let account = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.enable_encryption("master").unwrap();
    h.vault.lock();

    h.vault.rename_account(&account.id, "Alice").unwrap();
    h.vault.set_trusted(&account.id, true).unwrap();
    assert!(matches!(
        h.vault.update_secret(&account.id, "s2"),
        Err(VaultError::VaultLocked)
    ));

    let reopened = h.reopen();
    let stored = reopened.account(&account.id).unwrap();
    assert_eq!(stored.display_name, "Alice");
    assert!(stored.trusted_client);
    reopened.unlock("master").unwrap();
    assert_eq!(secrets_of(&reopened)["u1"], "s1");
}

#[test]
fn test_reset_device_identity() {
    let h = VaultHarness::new();
    let account = h.vault.add_account(undergrad("u1"), "s1").unwrap();
    h.vault.set_trusted(&account.id, true).unwrap();

    assert!(matches!(
        h.vault.reset_device_identity(&account.id, Some("not-hex")),
        Err(VaultError::InvalidDeviceId(_))
    ));

    let chosen = "00112233445566778899aabbccddeeff";
    assert_eq!(
        h.vault.reset_device_identity(&account.id, Some(chosen)).unwrap(),
        chosen
    );
    let stored = h.vault.account(&account.id).unwrap();
    assert_eq!(stored.device_id, chosen);
    assert!(!stored.trusted_client);

    let generated = h.vault.reset_device_identity(&account.id, None).unwrap();
    assert_ne!(generated, chosen);
    assert!(crate::is_valid_device_id(&generated));
}

#[test]
fn test_unknown_account_operations() {
    let h = VaultHarness::new();
    let missing = AccountId::from("missing");
    assert!(matches!(
        h.vault.rename_account(&missing, "x"),
        Err(VaultError::AccountNotFound(_))
    ));
    assert!(matches!(
        h.vault.credential(&missing),
        Err(VaultError::AccountNotFound(_))
    ));
    assert!(matches!(
        h.vault.set_current(&missing),
        Err(VaultError::AccountNotFound(_))
    ));
}

#[test]
fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    let open = || {
        crate::CredentialVault::open(
            Arc::new(crate::FileVaultStore::new(&path)),
            Arc::new(crate::NoArtifacts),
            harness::test_kdf(),
        )
        .unwrap()
    };

    let vault = open();
    let account = vault.add_account(undergrad("u1"), "s1").unwrap();
    vault.enable_encryption("master").unwrap();
    drop(vault);

    let vault = open();
    assert!(vault.is_locked());
    vault.unlock("master").unwrap();
    assert_eq!(&*vault.credential(&account.id).unwrap().secret, "s1");
}

#[test]
fn test_newer_format_version_rejected() {
    use crate::VaultStore;

    let store = Arc::new(crate::MemoryVaultStore::new());
    store.save(br#"{"version": 99, "accounts": []}"#).unwrap();

    let result = crate::CredentialVault::open(store, Arc::new(crate::NoArtifacts), harness::test_kdf());
    assert!(matches!(result, Err(VaultError::Corrupt(_))));
}
