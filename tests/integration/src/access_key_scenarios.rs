//! Access-key scenarios: issuance through revocation, end to end.

use crate::test_utils::*;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use osaurus_core::unix_now_secs;
use osaurus_crypto::{AgentKeyDeriver, Keypair, OsaurusId};
use osaurus_identity::{
    AccessKeyPayload, ExpirationPolicy, InvalidReason, ValidationResult, MASTER_KEY_LABEL,
};
use proptest::prelude::*;

fn master_secret(identity: &TestIdentity) -> Vec<u8> {
    use osaurus_identity::{PresenceMethod, PresenceProof, SecureKeyStore};
    let proof = PresenceProof::new(PresenceMethod::Biometric);
    identity
        .key_store
        .read(MASTER_KEY_LABEL, Some(&proof))
        .unwrap()
        .unwrap()
        .to_vec()
}

#[test]
fn test_agent_key_valid_then_revoked() {
    let identity = TestIdentity::new();
    let svc = &identity.service;

    let agent = svc.create_agent("research").unwrap();
    assert_eq!(agent.index, 0);
    assert_ne!(agent.address, identity.master);

    let (info, key) = svc
        .issue_access_key(&agent.address, Some("laptop"), ExpirationPolicy::NinetyDays)
        .unwrap();
    assert_eq!(info.iss, agent.address);
    assert_eq!(info.aud, agent.address);

    let handle = svc.validator_handle(&agent.address).unwrap();
    assert_eq!(
        handle.validate(&key),
        ValidationResult::Valid {
            issuer: agent.address
        }
    );

    svc.revoke_access_key(&info.id).unwrap();
    assert_eq!(handle.validate(&key), ValidationResult::Revoked);
    // A freshly built validator agrees with the published one.
    assert_eq!(
        svc.validator_for(&agent.address).unwrap().validate(&key),
        ValidationResult::Revoked
    );
}

#[test]
fn test_agent_addresses_match_derivation() {
    let identity = TestIdentity::new();
    let secret = master_secret(&identity);

    let agents: Vec<_> = (0..3)
        .map(|i| identity.service.create_agent(&format!("agent-{i}")).unwrap())
        .collect();
    for agent in &agents {
        let (_, expected) = AgentKeyDeriver::derive(&secret, agent.index).unwrap();
        assert_eq!(agent.address, expected);
    }
    assert_eq!(identity.service.list_agents().unwrap(), agents);
}

#[test]
fn test_key_with_past_expiry_reports_expired() {
    let identity = TestIdentity::new();
    let secret = master_secret(&identity);
    let (agent_keypair, agent_address) = {
        let agent = identity.service.create_agent("a").unwrap();
        AgentKeyDeriver::derive(&secret, agent.index).unwrap()
    };

    let now = unix_now_secs();
    let payload = AccessKeyPayload {
        aud: agent_address,
        cnt: 1,
        exp: Some(now - 1),
        iat: now - 100,
        iss: agent_address,
        lbl: None,
        nonce: "00112233445566778899aabbccddeeff".to_string(),
    };
    let key = payload.sign(&agent_keypair).unwrap();

    let validator = identity.service.validator_for(&agent_address).unwrap();
    assert_eq!(validator.validate(&key), ValidationResult::Expired);
}

#[test]
fn test_revoked_and_expired_reports_revoked() {
    let identity = TestIdentity::new();
    let (info, key) = identity
        .service
        .issue_access_key(&identity.master, None, ExpirationPolicy::ThirtyDays)
        .unwrap();
    identity.service.revoke_access_key(&info.id).unwrap();

    let validator = identity.service.validator_for(&identity.master).unwrap();
    let long_after = info.expires_at.unwrap() + 86_400;
    assert_eq!(validator.validate_at(&key, long_after), ValidationResult::Revoked);
}

#[test]
fn test_bulk_revocation_respects_threshold() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let agent = svc.create_agent("a").unwrap();

    let before: Vec<_> = (0..3)
        .map(|_| {
            svc.issue_access_key(&agent.address, None, ExpirationPolicy::Never)
                .unwrap()
        })
        .collect();
    let threshold = svc.revoke_all_access_keys(&agent.address).unwrap();
    let (after_info, after_key) = svc
        .issue_access_key(&agent.address, None, ExpirationPolicy::Never)
        .unwrap();

    let validator = svc.validator_for(&agent.address).unwrap();
    for (info, key) in &before {
        assert!(info.cnt <= threshold);
        assert_eq!(validator.validate(key), ValidationResult::Revoked);
    }
    assert!(after_info.cnt > threshold);
    assert!(validator.validate(&after_key).is_valid());

    let listed = svc.list_access_keys_for(&agent.address).unwrap();
    assert_eq!(listed.iter().filter(|k| k.revoked).count(), 3);
    assert_eq!(listed.iter().filter(|k| k.is_active()).count(), 1);
}

#[test]
fn test_master_key_spans_agents_agent_key_does_not() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let a = svc.create_agent("a").unwrap();
    let b = svc.create_agent("b").unwrap();

    let (_, master_key) = svc
        .issue_access_key(&identity.master, None, ExpirationPolicy::OneYear)
        .unwrap();
    let (_, a_key) = svc
        .issue_access_key(&a.address, None, ExpirationPolicy::OneYear)
        .unwrap();

    let for_a = svc.validator_for(&a.address).unwrap();
    let for_b = svc.validator_for(&b.address).unwrap();
    assert!(for_a.validate(&master_key).is_valid());
    assert!(for_b.validate(&master_key).is_valid());
    assert!(for_a.validate(&a_key).is_valid());
    assert_eq!(
        for_b.validate(&a_key),
        ValidationResult::Invalid(InvalidReason::AudienceMismatch)
    );
}

#[test]
fn test_external_issuer_needs_whitelisting() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let agent = svc.create_agent("a").unwrap();

    // A peer's key scoped at our agent.
    let peer = Keypair::from_secret_bytes(&[0x5a; 32]).unwrap();
    let now = unix_now_secs();
    let key = AccessKeyPayload {
        aud: agent.address,
        cnt: 1,
        exp: None,
        iat: now,
        iss: peer.address(),
        lbl: Some("peer".to_string()),
        nonce: "ffeeddccbbaa99887766554433221100".to_string(),
    }
    .sign(&peer)
    .unwrap();

    let handle = svc.validator_handle(&agent.address).unwrap();
    assert_eq!(
        handle.validate(&key),
        ValidationResult::Invalid(InvalidReason::IssuerNotWhitelisted)
    );

    svc.add_to_agent_whitelist(&agent.address, &peer.address())
        .unwrap();
    assert!(handle.validate(&key).is_valid());

    svc.remove_from_agent_whitelist(&agent.address, &peer.address())
        .unwrap();
    svc.add_to_master_whitelist(&peer.address()).unwrap();
    assert!(handle.validate(&key).is_valid());
}

#[test]
fn test_effective_whitelist_contains_self_and_master() {
    let identity = TestIdentity::new();
    let agent = identity.service.create_agent("a").unwrap();
    let validator = identity.service.validator_for(&agent.address).unwrap();

    assert!(identity.service.master_whitelist().unwrap().is_empty());
    assert!(validator.whitelist().contains(&agent.address));
    assert!(validator.whitelist().contains(&identity.master));
    assert_eq!(validator.whitelist().len(), 2);
}

#[test]
fn test_state_survives_restart() {
    let identity = TestIdentity::new();
    let agent = identity.service.create_agent("a").unwrap();
    let (info, key) = identity
        .service
        .issue_access_key(&agent.address, None, ExpirationPolicy::Never)
        .unwrap();
    let (_, other_key) = identity
        .service
        .issue_access_key(&agent.address, None, ExpirationPolicy::Never)
        .unwrap();
    identity.service.revoke_access_key(&info.id).unwrap();

    let restarted = identity.reopen();
    assert_eq!(restarted.master_address().unwrap(), identity.master);
    assert_eq!(restarted.device_id(), identity.service.device_id());
    assert_eq!(restarted.list_agents().unwrap(), vec![agent.clone()]);

    let validator = restarted.validator_for(&agent.address).unwrap();
    assert_eq!(validator.validate(&key), ValidationResult::Revoked);
    assert!(validator.validate(&other_key).is_valid());

    // The counter continues where it left off.
    let (next, _) = restarted
        .issue_access_key(&agent.address, None, ExpirationPolicy::Never)
        .unwrap();
    assert_eq!(next.cnt, 3);
}

#[test]
fn test_unknown_signer_rejected() {
    let identity = TestIdentity::new();
    let stranger = OsaurusId::from_bytes([0x42; 20]);
    assert!(matches!(
        identity
            .service
            .issue_access_key(&stranger, None, ExpirationPolicy::Never),
        Err(osaurus_identity::IdentityError::UnknownIssuer(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_single_byte_flip_in_payload_is_invalid(flip_at in any::<prop::sample::Index>(), mask in 1u8..=255) {
        let identity = TestIdentity::new();
        let (_, key) = identity
            .service
            .issue_access_key(&identity.master, None, ExpirationPolicy::Never)
            .unwrap();
        let validator = identity.service.validator_for(&identity.master).unwrap();

        let segments: Vec<&str> = key.split('.').collect();
        let mut payload = URL_SAFE_NO_PAD.decode(segments[1]).unwrap();
        let at = flip_at.index(payload.len());
        payload[at] ^= mask;
        let tampered = format!(
            "{}.{}.{}",
            segments[0],
            URL_SAFE_NO_PAD.encode(&payload),
            segments[2]
        );

        let result = validator.validate(&tampered);
        prop_assert!(matches!(result, ValidationResult::Invalid(_)), "{:?}", result);
    }
}
