//! Two-layer internal request tokens.
//!
//! ```text
//! base64url(header).base64url(payload).hex(signature).base64url(assertion)
//! ```
//!
//! Layer 1 is a recoverable secp256k1 signature by the master or an agent key
//! over the payload bytes under the `"Osaurus Signed Message"` domain. Layer 2
//! is the device attester's assertion over `sha256(payload)`, empty when the
//! device has no hardware attestation.
//!
//! Every token carries a fresh counter value from the [`CounterStore`]; the
//! verifier side pairs with a [`ReplayGuard`] that refuses counters it has
//! already seen for the same issuer and device.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use osaurus_core::{unix_now_secs, UnixSeconds};
use osaurus_crypto::{
    sha256, AgentKeyDeriver, OsaurusId, RecoverableSignature, REQUEST_TOKEN_DOMAIN,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::AgentRegistry;
use crate::counter::CounterStore;
use crate::device::DeviceAttester;
use crate::error::{IdentityError, IdentityResult};
use crate::master::MasterIdentityStore;
use crate::presence::PresenceProof;

pub const TOKEN_ALGORITHM: &str = "es256k+device-attest";
pub const TOKEN_TYPE: &str = "osaurus-id";
pub const TOKEN_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub ver: u32,
}

impl TokenHeader {
    /// Header of the current protocol version.
    pub fn current() -> Self {
        Self {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
            ver: TOKEN_VERSION,
        }
    }
}

/// Request token claims, fields in alphabetical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// `"<method> <path>"`, exactly as the caller supplied them
    pub act: String,
    pub aud: String,
    pub cnt: u64,
    pub dev: String,
    pub exp: UnixSeconds,
    pub iat: UnixSeconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idx: Option<u32>,
    pub iss: OsaurusId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub par: Option<OsaurusId>,
}

impl TokenPayload {
    pub fn action(method: &str, path: &str) -> String {
        format!("{method} {path}")
    }

    pub fn is_agent_token(&self) -> bool {
        self.par.is_some()
    }
}

/// A decoded request token.
#[derive(Debug, Clone)]
pub struct RequestToken {
    header: TokenHeader,
    payload: TokenPayload,
    payload_bytes: Vec<u8>,
    signature: RecoverableSignature,
    assertion: Vec<u8>,
    encoded: String,
}

impl RequestToken {
    fn assemble(
        payload: TokenPayload,
        payload_bytes: Vec<u8>,
        signature: RecoverableSignature,
        assertion: Vec<u8>,
    ) -> IdentityResult<Self> {
        let header = TokenHeader::current();
        let encoded = format!(
            "{}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(&payload_bytes),
            signature.to_hex(),
            URL_SAFE_NO_PAD.encode(&assertion)
        );
        Ok(Self {
            header,
            payload,
            payload_bytes,
            signature,
            assertion,
            encoded,
        })
    }

    /// Decode the four-segment wire form. Does not verify anything.
    pub fn parse(token: &str) -> IdentityResult<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_hex, assertion_b64] = segments[..] else {
            return Err(invalid("expected 4 segments"));
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| invalid("header is not base64url"))?;
        let header: TokenHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| invalid("malformed header"))?;
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| invalid("payload is not base64url"))?;
        let payload: TokenPayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| invalid("malformed payload"))?;
        let signature = RecoverableSignature::from_hex(signature_hex)
            .map_err(|_| invalid("malformed signature"))?;
        let assertion = URL_SAFE_NO_PAD
            .decode(assertion_b64)
            .map_err(|_| invalid("assertion is not base64url"))?;

        Ok(Self {
            header,
            payload,
            payload_bytes,
            signature,
            assertion,
            encoded: token.to_string(),
        })
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    /// The exact bytes covered by the signature.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload_bytes
    }

    pub fn signature(&self) -> &RecoverableSignature {
        &self.signature
    }

    /// Device assertion; empty for software-attested devices.
    pub fn assertion(&self) -> &[u8] {
        &self.assertion
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.encoded)
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn invalid(reason: &str) -> IdentityError {
    IdentityError::InvalidToken(reason.to_string())
}

/// Builds and signs request tokens for the master or one of its agents.
pub struct RequestTokenSigner {
    master: Arc<MasterIdentityStore>,
    agents: Arc<AgentRegistry>,
    device: Arc<DeviceAttester>,
    counter: Arc<dyn CounterStore>,
    ttl_secs: u64,
}

impl RequestTokenSigner {
    pub fn new(
        master: Arc<MasterIdentityStore>,
        agents: Arc<AgentRegistry>,
        device: Arc<DeviceAttester>,
        counter: Arc<dyn CounterStore>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            master,
            agents,
            device,
            counter,
            ttl_secs,
        }
    }

    /// Sign a token authorizing `method path` against `audience`.
    ///
    /// `issuer` must be the master address or a registered agent. Attestation
    /// failures are returned as errors; no token is produced without them.
    pub fn sign(
        &self,
        issuer: &OsaurusId,
        method: &str,
        path: &str,
        audience: &str,
        proof: &PresenceProof,
    ) -> IdentityResult<RequestToken> {
        let master = self.master.keypair(proof)?;
        let master_address = master.address();

        let (signer, par, idx) = if *issuer == master_address {
            (master, None, None)
        } else {
            let agent = self
                .agents
                .get_by_address(issuer)?
                .ok_or_else(|| IdentityError::UnknownIssuer(issuer.to_string()))?;
            let secret = self.master.raw_secret(proof)?;
            let (keypair, _) = AgentKeyDeriver::derive(&secret[..], agent.index)?;
            (keypair, Some(master_address), Some(agent.index))
        };

        let iat = unix_now_secs();
        let payload = TokenPayload {
            act: TokenPayload::action(method, path),
            aud: audience.to_string(),
            cnt: self.counter.next()?,
            dev: self.device.current_device_id().to_string(),
            exp: iat.saturating_add(self.ttl_secs),
            iat,
            idx,
            iss: signer.address(),
            par,
        };
        let payload_bytes = serde_json::to_vec(&payload)?;

        let signature = signer.sign_in_domain(REQUEST_TOKEN_DOMAIN, &payload_bytes)?;
        let assertion = self.device.assert(&sha256(&payload_bytes))?;

        debug!(
            iss = %payload.iss,
            dev = %payload.dev,
            cnt = payload.cnt,
            act = %payload.act,
            hardware = self.device.is_hardware_backed(),
            "Request token signed"
        );
        RequestToken::assemble(payload, payload_bytes, signature, assertion)
    }
}

/// Claims of a token that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    pub issuer: OsaurusId,
    pub device_id: String,
    pub counter: u64,
    pub action: String,
    pub agent_index: Option<u32>,
    pub hardware_attested: bool,
}

impl VerifiedRequest {
    pub fn authorizes(&self, method: &str, path: &str) -> bool {
        self.action == TokenPayload::action(method, path)
    }
}

/// Immutable verifier for request tokens addressed to one service.
#[derive(Debug, Clone)]
pub struct RequestTokenVerifier {
    audience: String,
    master: OsaurusId,
    agents: HashMap<OsaurusId, u32>,
    clock_skew_secs: u64,
}

impl RequestTokenVerifier {
    pub fn new(audience: impl Into<String>, master: OsaurusId) -> Self {
        Self {
            audience: audience.into(),
            master,
            agents: HashMap::new(),
            clock_skew_secs: 0,
        }
    }

    /// `(address, index)` pairs of agents whose tokens are accepted alongside
    /// the master's. An agent token must carry the registered index.
    pub fn with_agents(mut self, agents: impl IntoIterator<Item = (OsaurusId, u32)>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn with_clock_skew(mut self, secs: u64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    pub fn verify(&self, token: &str) -> IdentityResult<VerifiedRequest> {
        self.verify_at(token, unix_now_secs())
    }

    pub fn verify_at(&self, token: &str, now: UnixSeconds) -> IdentityResult<VerifiedRequest> {
        let token = RequestToken::parse(token)?;
        self.verify_parsed(&token, now)
    }

    pub fn verify_parsed(
        &self,
        token: &RequestToken,
        now: UnixSeconds,
    ) -> IdentityResult<VerifiedRequest> {
        if *token.header() != TokenHeader::current() {
            return Err(invalid("unsupported header"));
        }
        let payload = token.payload();

        let recovered = token
            .signature()
            .recover_in_domain(REQUEST_TOKEN_DOMAIN, token.payload_bytes())
            .map_err(|_| invalid("signature recovery failed"))?;
        if recovered != payload.iss {
            return Err(invalid("issuer mismatch"));
        }
        if payload.aud != self.audience {
            return Err(invalid("audience mismatch"));
        }

        match (payload.par, payload.idx) {
            (None, None) if payload.iss == self.master => {}
            (Some(par), Some(idx))
                if par == self.master && self.agents.get(&payload.iss) == Some(&idx) => {}
            _ => {
                warn!(iss = %payload.iss, "Request token from untrusted issuer");
                return Err(invalid("issuer not trusted"));
            }
        }

        if payload.exp <= payload.iat {
            return Err(invalid("empty validity window"));
        }
        if payload.iat > now.saturating_add(self.clock_skew_secs) {
            return Err(invalid("issued in the future"));
        }
        if now >= payload.exp.saturating_add(self.clock_skew_secs) {
            return Err(invalid("expired"));
        }

        Ok(VerifiedRequest {
            issuer: recovered,
            device_id: payload.dev.clone(),
            counter: payload.cnt,
            action: payload.act.clone(),
            agent_index: payload.idx,
            hardware_attested: !token.assertion().is_empty(),
        })
    }
}

/// Highest counter accepted per `(issuer, device)`.
///
/// Counters are strictly increasing per device, so anything at or below the
/// recorded value is a replay.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<(OsaurusId, String), u64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `request`, rejecting it if its counter is not fresh.
    pub fn check(&self, request: &VerifiedRequest) -> IdentityResult<()> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let key = (request.issuer, request.device_id.clone());
        match seen.get(&key) {
            Some(&last) if request.counter <= last => {
                warn!(
                    iss = %request.issuer,
                    dev = %request.device_id,
                    cnt = request.counter,
                    last,
                    "Replayed request token"
                );
                Err(invalid("replayed counter"))
            }
            _ => {
                seen.insert(key, request.counter);
                Ok(())
            }
        }
    }
}
