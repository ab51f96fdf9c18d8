//! Request-token signing and verification, including replay and
//! cross-protocol signature reuse.

use std::sync::Arc;

use crate::test_utils::*;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use osaurus_crypto::{
    domain_separated_hash, Keypair, RecoverableSignature, ACCESS_KEY_DOMAIN, REQUEST_TOKEN_DOMAIN,
};
use osaurus_identity::{
    HardwareAttester, ReplayGuard, RequestToken, StubHardwareAttester, ValidationResult,
};

#[test]
fn test_master_and_agent_tokens_verify() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let agent = svc.create_agent("coder").unwrap();

    let master_token = svc
        .sign_request(&identity.master, "GET", "/v1/models", "osaurus-api")
        .unwrap();
    let agent_token = svc
        .sign_request(&agent.address, "POST", "/v1/chat", "osaurus-api")
        .unwrap();

    let verifier = svc.request_verifier("osaurus-api").unwrap();
    let master_claims = verifier.verify(master_token.as_str()).unwrap();
    let agent_claims = verifier.verify(agent_token.as_str()).unwrap();

    assert_eq!(master_claims.issuer, identity.master);
    assert_eq!(master_claims.agent_index, None);
    assert_eq!(agent_claims.issuer, agent.address);
    assert_eq!(agent_claims.agent_index, Some(0));
    assert!(agent_claims.authorizes("POST", "/v1/chat"));
    assert!(agent_claims.counter > master_claims.counter);
}

#[test]
fn test_token_wire_format() {
    let identity = TestIdentity::new();
    let token = identity
        .service
        .sign_request(&identity.master, "DELETE", "/v1/keys/1", "osaurus-api")
        .unwrap();

    let segments: Vec<&str> = token.as_str().split('.').collect();
    assert_eq!(segments.len(), 4);

    let header: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
    assert_eq!(header["typ"], "osaurus-id");
    assert_eq!(header["ver"], 1);

    let payload: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[1]).unwrap()).unwrap();
    assert_eq!(payload["act"], "DELETE /v1/keys/1");
    assert_eq!(payload["dev"], identity.service.device_id());
    assert!(payload.get("par").is_none());
    assert_eq!(
        payload["exp"].as_u64().unwrap() - payload["iat"].as_u64().unwrap(),
        60
    );

    assert_eq!(segments[2].len(), 130);
    // Software device: empty assertion segment.
    assert!(segments[3].is_empty());
    assert!(token.bearer().starts_with("Bearer "));

    let reparsed = RequestToken::parse(token.as_str()).unwrap();
    assert_eq!(reparsed.payload(), token.payload());
}

#[test]
fn test_hardware_device_attaches_assertion() {
    let attester = Arc::new(StubHardwareAttester::new());
    let identity = TestIdentity::with_hardware(attester.clone() as Arc<dyn HardwareAttester>);
    assert!(identity.service.is_hardware_backed());

    let token = identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .unwrap();
    assert!(!token.assertion().is_empty());

    let claims = identity
        .service
        .request_verifier("osaurus-api")
        .unwrap()
        .verify(token.as_str())
        .unwrap();
    assert!(claims.hardware_attested);
}

#[test]
fn test_replayed_token_rejected() {
    let identity = TestIdentity::new();
    let verifier = identity.service.request_verifier("osaurus-api").unwrap();
    let guard = ReplayGuard::new();

    let token = identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .unwrap();
    let claims = verifier.verify(token.as_str()).unwrap();
    guard.check(&claims).unwrap();

    // Same token presented again.
    let replay = verifier.verify(token.as_str()).unwrap();
    assert!(guard.check(&replay).is_err());

    let fresh = identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .unwrap();
    guard
        .check(&verifier.verify(fresh.as_str()).unwrap())
        .unwrap();
}

#[test]
fn test_removed_agent_no_longer_trusted() {
    let identity = TestIdentity::new();
    let svc = &identity.service;
    let agent = svc.create_agent("temp").unwrap();
    let token = svc
        .sign_request(&agent.address, "GET", "/", "osaurus-api")
        .unwrap();

    svc.remove_agent(agent.index).unwrap();
    let verifier = svc.request_verifier("osaurus-api").unwrap();
    assert!(verifier.verify(token.as_str()).is_err());
    assert!(svc
        .sign_request(&agent.address, "GET", "/", "osaurus-api")
        .is_err());
}

#[test]
fn test_domains_do_not_cross() {
    let keypair = Keypair::from_secret_bytes(&[0x31; 32]).unwrap();
    let message = br#"{"aud":"x"}"#;

    let as_request = keypair
        .sign_in_domain(REQUEST_TOKEN_DOMAIN, message)
        .unwrap();
    let as_access = keypair.sign_in_domain(ACCESS_KEY_DOMAIN, message).unwrap();

    assert_ne!(
        domain_separated_hash(REQUEST_TOKEN_DOMAIN, message),
        domain_separated_hash(ACCESS_KEY_DOMAIN, message)
    );
    let recovered_cross = |sig: &RecoverableSignature, domain: &str| {
        sig.recover_in_domain(domain, message)
            .map(|address| address == keypair.address())
            .unwrap_or(false)
    };
    assert!(recovered_cross(&as_request, REQUEST_TOKEN_DOMAIN));
    assert!(!recovered_cross(&as_request, ACCESS_KEY_DOMAIN));
    assert!(recovered_cross(&as_access, ACCESS_KEY_DOMAIN));
    assert!(!recovered_cross(&as_access, REQUEST_TOKEN_DOMAIN));
}

#[test]
fn test_request_signature_not_accepted_as_access_key() {
    let identity = TestIdentity::new();
    let token = identity
        .service
        .sign_request(&identity.master, "GET", "/", "osaurus-api")
        .unwrap();

    // Re-wrap a request token's payload and signature as an access key.
    let segments: Vec<&str> = token.as_str().split('.').collect();
    let smuggled = format!("osk-v1.{}.{}", segments[1], segments[2]);
    let result = identity
        .service
        .validator_for(&identity.master)
        .unwrap()
        .validate(&smuggled);
    assert!(matches!(result, ValidationResult::Invalid(_)), "{result:?}");
}
