//! Plain logins: route selection, retry bounds, error kinds.

use super::harness::{AuthHarness, PASSWORD};
use crate::{AuthError, AuthEvent, AuthState, ErrorKind, RawOutcome, Route};
use campus_config_and_utils::RoutePreference;
use credential_vault::AccountId;

fn transport_timeout() -> RawOutcome {
    RawOutcome::Transport {
        timeout: true,
        connect: false,
        detail: "operation timed out".into(),
    }
}

#[tokio::test]
async fn test_direct_login_submits_once() {
    let h = AuthHarness::new();

    let session = h.authenticator.login(&h.account.id, None).await.unwrap();

    assert_eq!(session.route(), Route::Direct);
    assert_eq!(session.account_id(), &h.account.id);
    assert_eq!(h.provider.submits(), 1);
    assert_eq!(h.provider.tunnels(), 0);
    assert_eq!(h.authenticator.state(&h.account.id), AuthState::Authenticated);
}

#[tokio::test]
async fn test_webvpn_login_negotiates_tunnel_first() {
    let h = AuthHarness::with_route(RoutePreference::WebVpn);
    let mut events = h.authenticator.subscribe();

    let session = h.authenticator.login(&h.account.id, None).await.unwrap();
    assert_eq!(session.route(), Route::WebVpn);
    assert_eq!(h.provider.tunnels(), 1);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AuthEvent::StateChanged(payload) = event {
            states.push(payload.new_state);
        }
    }
    assert_eq!(
        states,
        vec![
            AuthState::TunnelNegotiating,
            AuthState::CredentialsSubmitted,
            AuthState::Authenticated,
        ]
    );
}

#[tokio::test]
async fn test_explicit_route_overrides_preference() {
    let h = AuthHarness::new();

    let session = h
        .authenticator
        .login(&h.account.id, Some(Route::WebVpn))
        .await
        .unwrap();

    assert_eq!(session.route(), Route::WebVpn);
    assert_eq!(h.provider.tunnels(), 1);
}

#[tokio::test]
async fn test_tunnel_failure_surfaces_tunnel_unavailable() {
    let h = AuthHarness::with_route(RoutePreference::WebVpn);
    h.provider.fail_tunnel(transport_timeout(), 10);

    let err = h.authenticator.login(&h.account.id, None).await.unwrap_err();

    assert!(matches!(err, AuthError::TunnelUnavailable(_)));
    assert_eq!(err.kind(), ErrorKind::TunnelUnavailable);
    // Default limit of two retries.
    assert_eq!(h.provider.tunnels(), 3);
    assert_eq!(h.provider.submits(), 0);
    assert_eq!(h.authenticator.state(&h.account.id), AuthState::Failed);
}

#[tokio::test]
async fn test_invalid_credentials_are_not_retried() {
    let h = AuthHarness::new();
    let account = h.add_account("1230000002", "wrong-password");

    let err = h.authenticator.login(&account.id, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(h.provider.submits(), 1);
    assert_eq!(h.authenticator.state(&account.id), AuthState::Failed);
}

#[tokio::test]
async fn test_network_errors_retry_up_to_limit() {
    let h = AuthHarness::new();
    h.provider.fail_submit(transport_timeout(), 10);

    let err = h.authenticator.login(&h.account.id, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert_eq!(h.provider.submits(), 3);
}

#[tokio::test]
async fn test_transient_failures_recover() {
    let h = AuthHarness::new();
    h.provider.fail_submit(RawOutcome::http(503, "maintenance"), 1);
    h.provider.fail_submit(RawOutcome::http(429, "slow down"), 1);

    h.authenticator.login(&h.account.id, None).await.unwrap();

    assert_eq!(h.provider.submits(), 3);
    assert_eq!(h.authenticator.state(&h.account.id), AuthState::Authenticated);
}

#[tokio::test]
async fn test_failed_login_can_be_retried() {
    let h = AuthHarness::new();
    h.provider.fail_submit(RawOutcome::http(401, "locked out"), 1);

    assert!(h.authenticator.login(&h.account.id, None).await.is_err());
    assert_eq!(h.authenticator.state(&h.account.id), AuthState::Failed);

    h.authenticator.login(&h.account.id, None).await.unwrap();
    assert_eq!(h.authenticator.state(&h.account.id), AuthState::Authenticated);
}

#[tokio::test]
async fn test_unknown_account_is_not_configured() {
    let h = AuthHarness::new();

    let err = h
        .authenticator
        .login(&AccountId::from("ghost"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotConfigured(_)));
    assert_eq!(h.provider.submits(), 0);
}

#[tokio::test]
async fn test_locked_vault_surfaces_vault_locked() {
    let h = AuthHarness::new();
    h.vault.enable_encryption("master").unwrap();
    h.vault.lock();

    let err = h.authenticator.login(&h.account.id, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VaultLocked);
    assert_eq!(h.provider.submits(), 0);

    h.vault.unlock("master").unwrap();
    h.authenticator.login(&h.account.id, None).await.unwrap();
}

#[tokio::test]
async fn test_same_account_logins_are_serialized() {
    let h = AuthHarness::new();
    *h.provider.submit_delay.lock() = std::time::Duration::from_millis(30);

    let (a, b) = tokio::join!(
        h.authenticator.login(&h.account.id, None),
        h.authenticator.login(&h.account.id, None),
    );

    a.unwrap();
    b.unwrap();
    assert_eq!(h.provider.submits(), 2);
    assert_eq!(h.provider.peak_concurrent_submits(), 1);
}

#[tokio::test]
async fn test_different_accounts_log_in_concurrently() {
    let h = AuthHarness::new();
    let other = h.add_account("1230000003", PASSWORD);
    *h.provider.submit_delay.lock() = std::time::Duration::from_millis(30);

    let (a, b) = tokio::join!(
        h.authenticator.login(&h.account.id, None),
        h.authenticator.login(&other.id, None),
    );

    a.unwrap();
    b.unwrap();
    assert_eq!(h.provider.peak_concurrent_submits(), 2);
}
