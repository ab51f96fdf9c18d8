//! Failure modes surface as errors and never produce tokens.

use std::sync::Arc;

use crate::test_utils::*;
use osaurus_identity::{
    CounterStore, DenyingPresenceGate, ExpirationPolicy, HardwareAttester, IdentityDatabase,
    IdentityError, InvalidReason, SqliteCounterStore, StubHardwareAttester, ValidationResult,
};

#[test]
fn test_presence_denial_blocks_key_use() {
    let identity = TestIdentity::build(Arc::new(DenyingPresenceGate), None);
    let svc = &identity.service;

    // Setup and address lookups never prompt.
    assert!(svc.has_identity().unwrap());
    assert_eq!(svc.master_address().unwrap(), identity.master);

    assert!(matches!(
        svc.create_agent("a"),
        Err(IdentityError::PresenceDenied(_))
    ));
    assert!(matches!(
        svc.sign_request(&identity.master, "GET", "/", "osaurus-api"),
        Err(IdentityError::PresenceDenied(_))
    ));
    assert!(matches!(
        svc.issue_access_key(&identity.master, None, ExpirationPolicy::Never),
        Err(IdentityError::PresenceDenied(_))
    ));
    assert!(svc.list_access_keys().unwrap().is_empty());
}

#[test]
fn test_unreachable_attester_fails_closed() {
    let attester = Arc::new(StubHardwareAttester::new());
    let identity = TestIdentity::with_hardware(attester.clone() as Arc<dyn HardwareAttester>);
    attester.set_reachable(false);

    assert!(matches!(
        identity
            .service
            .sign_request(&identity.master, "GET", "/", "osaurus-api"),
        Err(IdentityError::AttestationFailed(_))
    ));

    attester.set_reachable(true);
    assert!(identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .is_ok());
}

#[test]
fn test_unsupported_hardware_falls_back_to_software() {
    let identity = TestIdentity::with_hardware(Arc::new(StubHardwareAttester::unsupported()));
    assert!(!identity.service.is_hardware_backed());
    assert_eq!(identity.service.device_id().len(), 8);

    let token = identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .unwrap();
    assert!(token.assertion().is_empty());
}

#[test]
fn test_reset_invalidates_published_validators() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let agent = svc.create_agent("a").unwrap();
    let (_, key) = svc
        .issue_access_key(&agent.address, None, ExpirationPolicy::Never)
        .unwrap();
    let handle = svc.validator_handle(&agent.address).unwrap();
    assert!(handle.validate(&key).is_valid());

    svc.reset_identity().unwrap();

    assert!(!svc.has_identity().unwrap());
    assert!(svc.list_agents().unwrap().is_empty());
    assert!(svc.list_access_keys().unwrap().is_empty());
    assert_eq!(
        handle.validate(&key),
        ValidationResult::Invalid(InvalidReason::IssuerNotWhitelisted)
    );
    assert!(matches!(
        svc.master_address(),
        Err(IdentityError::NotFound(_))
    ));
}

#[test]
fn test_counter_never_moves_backwards() {
    let (config, dir) = temp_config();
    let db = Arc::new(IdentityDatabase::open(&config.storage.database_path).unwrap());
    let counter = SqliteCounterStore::new(db.clone(), "0badc0de");
    for _ in 0..5 {
        counter.next().unwrap();
    }

    assert!(matches!(
        counter.advance_to(2),
        Err(IdentityError::CounterRegression {
            stored: 5,
            attempted: 2,
            ..
        })
    ));
    drop(counter);
    drop(db);

    let reopened = IdentityDatabase::open(&config.storage.database_path).unwrap();
    let counter = SqliteCounterStore::new(Arc::new(reopened), "0badc0de");
    assert_eq!(counter.next().unwrap(), 6);
    let _ = std::fs::remove_dir_all(dir);
}
