//! Concurrent validation and signing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use crate::test_utils::*;
use osaurus_identity::{ExpirationPolicy, ValidationResult};

#[test]
fn test_validation_during_revocation_is_consistent() {
    let identity = Arc::new(TestIdentity::new());
    let svc = &identity.service;
    let agent = svc.create_agent("busy").unwrap();

    let keys: Vec<_> = (0..4)
        .map(|_| {
            svc.issue_access_key(&agent.address, None, ExpirationPolicy::Never)
                .unwrap()
        })
        .collect();
    let handle = svc.validator_handle(&agent.address).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let done = done.clone();
            let raw: Vec<String> = keys.iter().map(|(_, key)| key.to_string()).collect();
            thread::spawn(move || {
                let mut checks = 0usize;
                while !done.load(Ordering::Acquire) || checks == 0 {
                    for key in &raw {
                        let result = handle.validate(key);
                        assert!(
                            matches!(result, ValidationResult::Valid { .. } | ValidationResult::Revoked),
                            "unexpected {result:?}"
                        );
                        checks += 1;
                    }
                }
                checks
            })
        })
        .collect();

    for (info, _) in &keys {
        svc.revoke_access_key(&info.id).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    for (_, key) in &keys {
        assert_eq!(handle.validate(key), ValidationResult::Revoked);
    }
}

#[test]
fn test_concurrent_signers_get_distinct_counters() {
    let identity = Arc::new(TestIdentity::new());
    let barrier = Arc::new(Barrier::new(4));

    let signers: Vec<_> = (0..4)
        .map(|_| {
            let identity = identity.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..10)
                    .map(|_| {
                        identity
                            .service
                            .sign_request(&identity.master, "GET", "/", "osaurus-api")
                            .unwrap()
                            .payload()
                            .cnt
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for signer in signers {
        for cnt in signer.join().unwrap() {
            assert!(seen.insert(cnt), "counter {cnt} issued twice");
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(seen.iter().max().copied(), Some(40));
}

#[test]
fn test_concurrent_issuance_and_validation() {
    let identity = Arc::new(TestIdentity::new());
    let master = identity.master;
    let handle = identity.service.validator_handle(&master).unwrap();

    let issuers: Vec<_> = (0..3)
        .map(|i| {
            let identity = identity.clone();
            thread::spawn(move || {
                (0..5)
                    .map(|_| {
                        let (_, key) = identity
                            .service
                            .issue_access_key(
                                &identity.master,
                                Some(&format!("worker-{i}")),
                                ExpirationPolicy::OneYear,
                            )
                            .unwrap();
                        key.to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let keys: Vec<String> = issuers
        .into_iter()
        .flat_map(|issuer| issuer.join().unwrap())
        .collect();
    assert_eq!(keys.len(), 15);
    assert_eq!(identity.service.list_access_keys().unwrap().len(), 15);
    for key in &keys {
        assert!(handle.validate(key).is_valid());
    }
}
