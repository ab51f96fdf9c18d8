//! Hardware attestation backends.
//!
//! A [`HardwareAttester`] owns a non-exportable asymmetric key (Secure Enclave,
//! App Attest, TPM, StrongBox) and signs client-data hashes with it. Real
//! backends live with the platform layer; [`StubHardwareAttester`] simulates
//! one with in-process P-256 keys so the hardware code path can be exercised
//! anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use signature::{Signer, Verifier};
use tracing::{error, info, warn};

use crate::error::{IdentityError, IdentityResult};

/// A hardware-backed key that can attest over arbitrary data.
pub trait HardwareAttester: Send + Sync {
    /// Capability probe; `false` selects the software fallback.
    fn is_supported(&self) -> bool;

    /// Create a new hardware key and return its opaque handle.
    fn generate_key(&self) -> IdentityResult<String>;

    /// Whether `handle` still refers to a live key. The OS may revoke keys.
    fn has_key(&self, handle: &str) -> bool;

    /// Attest over `client_data_hash` with the key behind `handle`.
    fn assert(&self, handle: &str, client_data_hash: &[u8; 32]) -> IdentityResult<Vec<u8>>;
}

/// In-process stand-in for a hardware attester.
#[derive(Debug)]
pub struct StubHardwareAttester {
    supported: bool,
    reachable: AtomicBool,
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl StubHardwareAttester {
    pub fn new() -> Self {
        warn!("STATUS: HardwareAttester :: Hardware Root of Trust :: STUBBED");
        Self {
            supported: true,
            reachable: AtomicBool::new(true),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// A stub that reports no hardware, forcing the software fallback.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Simulate the secure element becoming unreachable (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Simulate OS-level revocation of a key.
    pub fn revoke_key(&self, handle: &str) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(handle).is_some()
    }

    /// SEC1 public key behind `handle`.
    pub fn public_key(&self, handle: &str) -> Option<Vec<u8>> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(handle)
            .map(|key| key.verifying_key().to_encoded_point(true).as_bytes().to_vec())
    }

    /// Check an assertion produced by [`HardwareAttester::assert`].
    pub fn verify_assertion(
        public_key: &[u8],
        client_data_hash: &[u8; 32],
        assertion: &[u8],
    ) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
            error!("AttestGate :: Invalid Public Key Format");
            return false;
        };
        let Ok(signature) = Signature::from_der(assertion) else {
            error!("AttestGate :: Invalid DER Signature");
            return false;
        };
        verifying_key.verify(client_data_hash, &signature).is_ok()
    }

    /// Stable handle for a key: 16 bytes of BLAKE3 over the public key.
    fn key_handle(verifying_key: &VerifyingKey) -> String {
        let hash = blake3::hash(verifying_key.to_encoded_point(true).as_bytes());
        hex::encode(&hash.as_bytes()[..16])
    }
}

impl Default for StubHardwareAttester {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareAttester for StubHardwareAttester {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn generate_key(&self) -> IdentityResult<String> {
        if !self.supported {
            return Err(IdentityError::AttestationFailed(
                "hardware attestation not supported".to_string(),
            ));
        }
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let handle = Self::key_handle(signing_key.verifying_key());

        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(handle.clone(), signing_key);
        info!(handle = %handle, "Hardware attestation key generated");
        Ok(handle)
    }

    fn has_key(&self, handle: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.contains_key(handle)
    }

    fn assert(&self, handle: &str, client_data_hash: &[u8; 32]) -> IdentityResult<Vec<u8>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(IdentityError::AttestationFailed(
                "secure element unreachable".to_string(),
            ));
        }
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let key = keys.get(handle).ok_or_else(|| {
            IdentityError::AttestationFailed(format!("hardware key '{handle}' not found"))
        })?;
        let signature: Signature = key.sign(client_data_hash);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
