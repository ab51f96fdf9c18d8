//! Request-time access-key validation.
//!
//! An [`AccessKeyValidator`] is an immutable value built from the agent and
//! master addresses plus a whitelist and revocation snapshot. `validate` reads
//! only that captured state, so any number of threads may call it without
//! locking. State changes publish a new validator through a
//! [`ValidatorHandle`]; nothing is mutated in place.

use std::fmt;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use osaurus_core::{unix_now_secs, UnixSeconds};
use osaurus_crypto::{OsaurusId, RecoverableSignature, ACCESS_KEY_DOMAIN};
use tracing::{debug, trace};

use crate::access_key::{AccessKeyPayload, ACCESS_KEY_VERSION};
use crate::revocation::RevocationSnapshot;
use crate::whitelist::WhitelistSnapshot;

/// Why a key was rejected as `Invalid`.
///
/// For operator diagnostics. Do not echo these to untrusted callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    UnrecognizedFormat,
    MalformedPayload,
    SignatureRecoveryFailed,
    IssuerMismatch,
    AudienceMismatch,
    IssuerNotWhitelisted,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnrecognizedFormat => "Unrecognized token format",
            Self::MalformedPayload => "Malformed payload",
            Self::SignatureRecoveryFailed => "Signature recovery failed",
            Self::IssuerMismatch => "Issuer mismatch",
            Self::AudienceMismatch => "Audience mismatch",
            Self::IssuerNotWhitelisted => "Issuer not whitelisted",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating an access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid { issuer: OsaurusId },
    Invalid(InvalidReason),
    Expired,
    Revoked,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn issuer(&self) -> Option<&OsaurusId> {
        match self {
            Self::Valid { issuer } => Some(issuer),
            _ => None,
        }
    }
}

/// Immutable validator for `osk-v1` keys presented to one agent.
#[derive(Debug, Clone)]
pub struct AccessKeyValidator {
    agent: OsaurusId,
    master: OsaurusId,
    whitelist: WhitelistSnapshot,
    revocation: Arc<RevocationSnapshot>,
    has_keys: bool,
}

impl AccessKeyValidator {
    pub fn new(
        agent: OsaurusId,
        master: OsaurusId,
        whitelist: WhitelistSnapshot,
        revocation: Arc<RevocationSnapshot>,
        has_keys: bool,
    ) -> Self {
        Self {
            agent,
            master,
            whitelist,
            revocation,
            has_keys,
        }
    }

    pub fn agent(&self) -> &OsaurusId {
        &self.agent
    }

    pub fn master(&self) -> &OsaurusId {
        &self.master
    }

    /// Whether any access key has been issued for this agent.
    ///
    /// Lets middleware decide whether to demand a key; `validate` ignores it.
    pub fn has_keys(&self) -> bool {
        self.has_keys
    }

    pub fn whitelist(&self) -> &WhitelistSnapshot {
        &self.whitelist
    }

    pub fn revocation(&self) -> &RevocationSnapshot {
        &self.revocation
    }

    pub fn validate(&self, raw_key: &str) -> ValidationResult {
        self.validate_at(raw_key, unix_now_secs())
    }

    /// Validate as of `now`. Revocation is checked before expiry.
    pub fn validate_at(&self, raw_key: &str, now: UnixSeconds) -> ValidationResult {
        let result = self.evaluate(raw_key, now);
        match &result {
            ValidationResult::Valid { issuer } => trace!(issuer = %issuer, "Access key accepted"),
            ValidationResult::Invalid(reason) => debug!(%reason, "Access key rejected"),
            ValidationResult::Expired => debug!("Access key expired"),
            ValidationResult::Revoked => debug!("Access key revoked"),
        }
        result
    }

    fn evaluate(&self, raw_key: &str, now: UnixSeconds) -> ValidationResult {
        use ValidationResult::{Expired, Invalid, Revoked, Valid};

        let mut segments = raw_key.split('.');
        let (Some(version), Some(payload_b64), Some(signature_hex), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Invalid(InvalidReason::UnrecognizedFormat);
        };
        if version != ACCESS_KEY_VERSION {
            return Invalid(InvalidReason::UnrecognizedFormat);
        }

        let Ok(payload_bytes) = URL_SAFE_NO_PAD.decode(payload_b64) else {
            return Invalid(InvalidReason::UnrecognizedFormat);
        };
        let Ok(signature) = RecoverableSignature::from_hex(signature_hex) else {
            return Invalid(InvalidReason::UnrecognizedFormat);
        };

        let Ok(payload) = serde_json::from_slice::<AccessKeyPayload>(&payload_bytes) else {
            return Invalid(InvalidReason::MalformedPayload);
        };

        let Ok(recovered) = signature.recover_in_domain(ACCESS_KEY_DOMAIN, &payload_bytes) else {
            return Invalid(InvalidReason::SignatureRecoveryFailed);
        };
        if recovered != payload.iss {
            return Invalid(InvalidReason::IssuerMismatch);
        }
        if payload.aud != self.agent && payload.aud != self.master {
            return Invalid(InvalidReason::AudienceMismatch);
        }
        if !self.whitelist.contains(&payload.iss) {
            return Invalid(InvalidReason::IssuerNotWhitelisted);
        }

        if self
            .revocation
            .is_revoked(&payload.iss, &payload.nonce, payload.cnt)
        {
            return Revoked;
        }
        if payload.exp.is_some_and(|exp| now >= exp) {
            return Expired;
        }

        Valid { issuer: recovered }
    }
}

/// Atomically swappable reference to the current validator.
///
/// Readers clone the `Arc` under a brief read lock and validate without any
/// lock held.
#[derive(Debug)]
pub struct ValidatorHandle {
    current: RwLock<Arc<AccessKeyValidator>>,
}

impl ValidatorHandle {
    pub fn new(validator: AccessKeyValidator) -> Self {
        Self {
            current: RwLock::new(Arc::new(validator)),
        }
    }

    pub fn current(&self) -> Arc<AccessKeyValidator> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish `validator`, returning the one it replaced.
    pub fn swap(&self, validator: AccessKeyValidator) -> Arc<AccessKeyValidator> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, Arc::new(validator))
    }

    pub fn validate(&self, raw_key: &str) -> ValidationResult {
        self.current().validate(raw_key)
    }
}
