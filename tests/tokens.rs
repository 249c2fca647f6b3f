//! Token lifecycle tests: login, verification, expiry, single-use refresh, logout

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use predacl::{AclError, Store, TokenManager};
use tempfile::TempDir;

const SECRET: &[u8] = b"an-hs256-secret-of-at-least-32-bytes";

fn setup(access_ttl: Duration, refresh_ttl: Duration) -> (TempDir, Arc<Store>, TokenManager) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(dir.path().join("acl")).unwrap());
    store.bootstrap("password").unwrap();
    store
        .transact(|tx| {
            tx.create_user("alice", "simplepassword")?;
            tx.create_group("dev")?;
            tx.add_member("alice", "dev")
        })
        .unwrap();
    let tokens = TokenManager::new(store.clone(), SECRET, access_ttl, refresh_ttl);
    (dir, store, tokens)
}

fn default_setup() -> (TempDir, Arc<Store>, TokenManager) {
    setup(Duration::from_secs(3600), Duration::from_secs(86400))
}

// ============================================================================
// Authenticate
// ============================================================================

#[test]
fn login_embeds_current_groups() {
    let (_dir, _store, tokens) = default_setup();
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    let session = tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(session.user, "alice");
    assert_eq!(session.groups, vec!["dev"]);
    assert!(session.expires_at > session.issued_at);
}

#[test]
fn wrong_password_and_unknown_user_look_the_same() {
    let (_dir, _store, tokens) = default_setup();
    let wrong = tokens.authenticate("alice", "nope").unwrap_err();
    let unknown = tokens.authenticate("mallory", "simplepassword").unwrap_err();
    assert_eq!(wrong, AclError::InvalidCredentials);
    assert_eq!(wrong.to_string(), unknown.to_string());
    assert!(wrong.to_string().contains("InvalidCredentials"));
}

#[test]
fn groot_logs_in_with_bootstrap_password() {
    let (_dir, _store, tokens) = default_setup();
    let pair = tokens.authenticate("groot", "password").unwrap();
    let session = tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(session.groups, vec!["guardians"]);
}

// ============================================================================
// VerifyAccess
// ============================================================================

#[test]
fn tampered_token_is_invalid() {
    let (_dir, _store, tokens) = default_setup();
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    let mut forged = pair.access_token.clone();
    forged.push('x');
    assert!(matches!(tokens.verify_access(&forged), Err(AclError::TokenInvalid(_))));
    assert!(matches!(tokens.verify_access("not.a.jwt"), Err(AclError::TokenInvalid(_))));
}

#[test]
fn token_from_another_secret_is_invalid() {
    let (_dir, store, tokens) = default_setup();
    let other = TokenManager::new(
        store,
        b"a-completely-different-secret-value!!",
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let pair = other.authenticate("alice", "simplepassword").unwrap();
    assert!(matches!(tokens.verify_access(&pair.access_token), Err(AclError::TokenInvalid(_))));
}

#[test]
fn access_token_expires() {
    let (_dir, _store, tokens) = setup(Duration::from_secs(1), Duration::from_secs(60));
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    assert!(tokens.verify_access(&pair.access_token).is_ok());
    sleep(Duration::from_millis(2500));
    assert_eq!(tokens.verify_access(&pair.access_token), Err(AclError::TokenExpired));
}

// ============================================================================
// Refresh
// ============================================================================

#[test]
fn refresh_token_is_single_use() {
    let (_dir, _store, tokens) = default_setup();
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    let next = tokens.refresh(&pair.refresh_token).unwrap();
    assert_ne!(next.refresh_token, pair.refresh_token);
    assert!(tokens.verify_access(&next.access_token).is_ok());

    let err = tokens.refresh(&pair.refresh_token).unwrap_err();
    assert!(matches!(err, AclError::RefreshInvalid(_)));
    // The rotated token still works once
    assert!(tokens.refresh(&next.refresh_token).is_ok());
}

#[test]
fn unknown_refresh_token_is_invalid() {
    let (_dir, _store, tokens) = default_setup();
    assert!(matches!(tokens.refresh("made-up"), Err(AclError::RefreshInvalid(_))));
}

#[test]
fn refresh_token_expires() {
    let (_dir, _store, tokens) = setup(Duration::from_secs(1), Duration::from_millis(50));
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    sleep(Duration::from_millis(150));
    assert_eq!(tokens.refresh(&pair.refresh_token), Err(AclError::RefreshExpired));
}

#[test]
fn oversized_ttls_saturate_instead_of_wrapping() {
    let (_dir, _store, tokens) = setup(Duration::MAX, Duration::MAX);
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    let session = tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(session.expires_at, i64::MAX);
    assert!(tokens.refresh(&pair.refresh_token).is_ok());
}

#[test]
fn refresh_picks_up_membership_changes() {
    let (_dir, store, tokens) = default_setup();
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    store
        .transact(|tx| {
            tx.create_group("qa")?;
            tx.add_member("alice", "qa")?;
            tx.remove_member("alice", "dev").map(|_| ())
        })
        .unwrap();

    // Old token still carries the membership it was issued with
    let stale = tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(stale.groups, vec!["dev"]);

    let fresh = tokens.refresh(&pair.refresh_token).unwrap();
    assert_eq!(tokens.verify_access(&fresh.access_token).unwrap().groups, vec!["qa"]);
}

#[test]
fn refresh_for_deleted_user_fails() {
    let (_dir, store, tokens) = default_setup();
    let pair = tokens.authenticate("alice", "simplepassword").unwrap();
    store.transact(|tx| tx.delete_user("alice")).unwrap();
    assert!(matches!(tokens.refresh(&pair.refresh_token), Err(AclError::RefreshInvalid(_))));
}

// ============================================================================
// Logout
// ============================================================================

#[test]
fn revoke_drops_one_token() {
    let (_dir, store, tokens) = default_setup();
    let a = tokens.authenticate("alice", "simplepassword").unwrap();
    let b = tokens.authenticate("alice", "simplepassword").unwrap();
    assert_eq!(store.refresh_token_count("alice").unwrap(), 2);

    assert!(tokens.revoke(&a.refresh_token).unwrap());
    assert!(!tokens.revoke(&a.refresh_token).unwrap());
    assert!(tokens.refresh(&a.refresh_token).is_err());
    assert!(tokens.refresh(&b.refresh_token).is_ok());
}

#[test]
fn revoke_all_drops_every_token_of_the_user() {
    let (_dir, store, tokens) = default_setup();
    let a = tokens.authenticate("alice", "simplepassword").unwrap();
    tokens.authenticate("alice", "simplepassword").unwrap();
    let g = tokens.authenticate("groot", "password").unwrap();

    assert_eq!(tokens.revoke_all("alice").unwrap(), 2);
    assert_eq!(store.refresh_token_count("alice").unwrap(), 0);
    assert!(tokens.refresh(&a.refresh_token).is_err());
    assert!(tokens.refresh(&g.refresh_token).is_ok());
}
