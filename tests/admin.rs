//! Protected administration tests

use predacl::{AclConfig, AclError, AclService, Caller, Credentials, GroupInfo, READ, WRITE};
use tempfile::TempDir;

const SECRET: &[u8] = b"an-hs256-secret-of-at-least-32-bytes";

fn setup() -> (TempDir, AclService, Caller) {
    let dir = TempDir::new().unwrap();
    let config = AclConfig {
        db_path: dir.path().join("acl"),
        secret: SECRET.to_vec(),
        ..AclConfig::default()
    };
    let svc = AclService::open(config).unwrap();
    let groot = svc.caller(&Credentials::from_pair(&svc.login("groot", "password").unwrap())).unwrap();
    (dir, svc, groot)
}

fn login_as(svc: &AclService, user: &str, password: &str) -> Caller {
    svc.caller(&Credentials::from_pair(&svc.login(user, password).unwrap())).unwrap()
}

// ============================================================================
// Authorization
// ============================================================================

#[test]
fn non_guardians_cannot_administer() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    let alice = login_as(&svc, "alice", "pw");
    assert!(!alice.is_guardian());

    let checks = [
        admin.create_user(&alice, "bob", "pw"),
        admin.create_group(&alice, "dev"),
        admin.add_member(&alice, "alice", "guardians"),
        admin.set_rule(&alice, "guardians", "name", READ),
        admin.set_password(&alice, "groot", "mine"),
    ];
    for r in checks {
        let err = r.unwrap_err();
        assert!(matches!(err, AclError::PermissionDenied(_)), "{err}");
    }
    assert!(admin.list_users(&Caller::anonymous()).is_err());
}

#[test]
fn default_caller_cannot_administer() {
    let (_dir, svc, _groot) = setup();
    let err = svc.admin().create_group(&Caller::default(), "dev").unwrap_err();
    assert!(matches!(err, AclError::PermissionDenied(_)));
}

#[test]
fn demoted_guardian_loses_admin_rights_immediately() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "gina", "pw").unwrap();
    admin.add_member(&groot, "gina", "guardians").unwrap();
    svc.cache().refresh().unwrap();
    let gina = login_as(&svc, "gina", "pw");
    admin.create_group(&gina, "dev").unwrap();

    admin.remove_member(&groot, "gina", "guardians").unwrap();
    // The caller value still says guardian; the store no longer does
    assert!(gina.is_guardian());
    let err = admin.create_group(&gina, "qa").unwrap_err();
    assert!(matches!(err, AclError::PermissionDenied(_)));
}

#[test]
fn promoted_guardian_can_administer_after_refresh() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    admin.add_member(&groot, "alice", "guardians").unwrap();
    svc.cache().refresh().unwrap();

    let alice = login_as(&svc, "alice", "pw");
    assert!(alice.is_guardian());
    admin.create_group(&alice, "dev").unwrap();
}

// ============================================================================
// Users
// ============================================================================

#[test]
fn create_and_list_users() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    admin.create_user(&groot, "bob", "pw").unwrap();
    assert_eq!(admin.list_users(&groot).unwrap(), vec!["alice", "bob", "groot"]);

    let err = admin.create_user(&groot, "alice", "again").unwrap_err();
    assert!(matches!(err, AclError::InvalidRequest(_)));
}

#[test]
fn change_password() {
    let (_dir, svc, groot) = setup();
    svc.admin().create_user(&groot, "alice", "old").unwrap();
    svc.admin().set_password(&groot, "alice", "new").unwrap();
    assert_eq!(svc.login("alice", "old").unwrap_err(), AclError::InvalidCredentials);
    assert!(svc.login("alice", "new").is_ok());
    assert!(svc.admin().set_password(&groot, "ghost", "x").is_err());
}

#[test]
fn delete_user_removes_memberships_and_sessions() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    admin.create_group(&groot, "dev").unwrap();
    admin.add_member(&groot, "alice", "dev").unwrap();
    let pair = svc.login("alice", "pw").unwrap();

    assert!(admin.delete_user(&groot, "alice").unwrap());
    assert!(admin.group_members(&groot, "dev").unwrap().is_empty());
    assert_eq!(svc.store().refresh_token_count("alice").unwrap(), 0);
    assert!(svc.tokens().refresh(&pair.refresh_token).is_err());
    assert_eq!(svc.login("alice", "pw").unwrap_err(), AclError::InvalidCredentials);
    assert!(!admin.delete_user(&groot, "alice").unwrap());
}

#[test]
fn groot_is_protected() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    assert!(matches!(admin.delete_user(&groot, "groot"), Err(AclError::InvalidRequest(_))));
    assert!(matches!(admin.delete_group(&groot, "guardians"), Err(AclError::InvalidRequest(_))));
    assert!(matches!(
        admin.remove_member(&groot, "groot", "guardians"),
        Err(AclError::InvalidRequest(_))
    ));
    assert!(svc.store().user_exists("groot").unwrap());
    assert_eq!(admin.group_members(&groot, "guardians").unwrap(), vec!["groot"]);
}

// ============================================================================
// Groups & rules
// ============================================================================

#[test]
fn delete_group_removes_rules_and_memberships() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    admin.create_group(&groot, "dev").unwrap();
    admin.add_member(&groot, "alice", "dev").unwrap();
    admin.set_rule(&groot, "dev", "name", READ).unwrap();

    assert!(admin.delete_group(&groot, "dev").unwrap());
    assert!(svc.store().user_groups("alice").unwrap().is_empty());
    assert!(svc.store().all_rules().unwrap().is_empty());
    assert!(admin.list_rules(&groot, "dev").is_err());
    assert!(!admin.list_groups(&groot).unwrap().contains(&"dev".to_string()));
}

#[test]
fn rules_are_last_write_wins() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_group(&groot, "dev").unwrap();
    admin.set_rule(&groot, "dev", "name", READ).unwrap();
    admin.set_rule(&groot, "dev", "name", READ | WRITE).unwrap();
    admin.set_rule(&groot, "dev", "age", READ).unwrap();
    assert_eq!(
        admin.list_rules(&groot, "dev").unwrap(),
        vec![("age".to_string(), READ), ("name".to_string(), 6)]
    );

    assert!(admin.remove_rule(&groot, "dev", "age").unwrap());
    assert_eq!(admin.list_rules(&groot, "dev").unwrap().len(), 1);
}

#[test]
fn rule_values_are_validated() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_group(&groot, "dev").unwrap();
    assert!(matches!(admin.set_rule(&groot, "dev", "name", 9), Err(AclError::InvalidRequest(_))));
    assert!(matches!(admin.set_rule(&groot, "nope", "name", READ), Err(AclError::InvalidRequest(_))));
}

#[test]
fn changes_reach_enforcement_on_refresh() {
    let (_dir, svc, groot) = setup();
    let admin = svc.admin();
    admin.create_user(&groot, "alice", "pw").unwrap();
    admin.create_group(&groot, "dev").unwrap();
    admin.add_member(&groot, "alice", "dev").unwrap();
    let alice = login_as(&svc, "alice", "pw");

    admin.set_rule(&groot, "dev", "name", READ).unwrap();
    assert_eq!(svc.enforcer().permission(&alice, "name"), 0);
    svc.cache().refresh().unwrap();
    assert_eq!(svc.enforcer().permission(&alice, "name"), READ);
}

// ============================================================================
// Self-service reads
// ============================================================================

fn dev_with_alice(svc: &AclService, groot: &Caller) {
    let admin = svc.admin();
    admin.create_user(groot, "alice", "simplepassword").unwrap();
    admin.create_group(groot, "dev").unwrap();
    admin.add_member(groot, "alice", "dev").unwrap();
    admin.set_rule(groot, "dev", "name", READ).unwrap();
    admin.set_rule(groot, "dev", "nickname", WRITE).unwrap();
}

#[test]
fn user_reads_own_groups_rules_and_members() {
    let (_dir, svc, groot) = setup();
    dev_with_alice(&svc, &groot);
    let creds = Credentials::from_pair(&svc.login("alice", "simplepassword").unwrap());

    let info = svc.admin().current_user(&creds).unwrap().request;
    assert_eq!(info.name, "alice");
    assert_eq!(
        info.groups,
        vec![GroupInfo {
            name: "dev".into(),
            rules: vec![("name".into(), 4), ("nickname".into(), 2)],
            members: vec!["alice".into()],
        }]
    );
}

#[test]
fn user_cannot_read_groups_outside_membership() {
    let (_dir, svc, groot) = setup();
    dev_with_alice(&svc, &groot);
    let alice = Credentials::from_pair(&svc.login("alice", "simplepassword").unwrap());

    assert_eq!(svc.admin().group(&alice, "guardians").unwrap().request, None);
    assert_eq!(svc.admin().group(&alice, "nope").unwrap().request, None);
    assert!(svc.admin().group(&alice, "dev").unwrap().request.is_some());
    assert!(svc.admin().group_members(&login_as(&svc, "alice", "simplepassword"), "guardians").is_err());

    let groot_creds = Credentials::from_pair(&svc.login("groot", "password").unwrap());
    let guardians = svc.admin().group(&groot_creds, "guardians").unwrap().request.unwrap();
    assert_eq!(guardians.members, vec!["groot"]);
}

#[test]
fn anonymous_has_no_user_record() {
    let (_dir, svc, _groot) = setup();
    let err = svc.admin().current_user(&Credentials::anonymous()).unwrap_err();
    assert!(matches!(err, AclError::Unauthenticated(_)));
    assert!(svc.admin().group(&Credentials::anonymous(), "guardians").is_err());
}
