//! Master identity: the long-lived root secp256k1 key of a human operator.
//!
//! The secret lives only in the [`SecureKeyStore`], written behind a presence
//! gate. Every read needs a fresh [`PresenceProof`], and all presence-gated
//! work in the process is serialized through one lock so two biometric
//! prompts never overlap.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use osaurus_crypto::{Keypair, OsaurusId, RecoverableSignature, SecureRandom};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{IdentityError, IdentityResult};
use crate::keystore::SecureKeyStore;
use crate::presence::{PresenceGate, PresenceProof};

/// Key store label of the master secret.
pub const MASTER_KEY_LABEL: &str = "ai.osaurus.identity.master";

pub struct MasterIdentityStore {
    key_store: Arc<dyn SecureKeyStore>,
    rng: Arc<dyn SecureRandom>,
    proof_max_age: Duration,
    presence_lock: Mutex<()>,
}

impl MasterIdentityStore {
    pub fn new(
        key_store: Arc<dyn SecureKeyStore>,
        rng: Arc<dyn SecureRandom>,
        proof_max_age: Duration,
    ) -> Self {
        Self {
            key_store,
            rng,
            proof_max_age,
            presence_lock: Mutex::new(()),
        }
    }

    fn lock_presence(&self) -> MutexGuard<'_, ()> {
        self.presence_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a master key exists. Never prompts.
    pub fn exists(&self) -> IdentityResult<bool> {
        self.key_store.contains(MASTER_KEY_LABEL)
    }

    /// Create the master key. Fails with `AlreadyExists` if one is present.
    pub fn generate(&self) -> IdentityResult<OsaurusId> {
        let _guard = self.lock_presence();
        if self.exists()? {
            return Err(IdentityError::AlreadyExists(
                "a master key is already present".to_string(),
            ));
        }

        let (secret, keypair) = Keypair::generate(self.rng.as_ref())?;
        self.key_store.write(MASTER_KEY_LABEL, &secret[..], true)?;

        let address = keypair.address();
        info!(address = %address, "Master identity created");
        Ok(address)
    }

    /// Prompt through `gate` while holding the presence lock.
    pub fn authorize(&self, gate: &dyn PresenceGate, reason: &str) -> IdentityResult<PresenceProof> {
        let _guard = self.lock_presence();
        gate.obtain_proof(reason)
    }

    pub fn address(&self, proof: &PresenceProof) -> IdentityResult<OsaurusId> {
        Ok(self.keypair(proof)?.address())
    }

    /// Sign a 32-byte digest with the master key.
    pub fn sign(&self, digest: &[u8; 32], proof: &PresenceProof) -> IdentityResult<RecoverableSignature> {
        let keypair = self.keypair(proof)?;
        Ok(keypair.sign_prehash(digest)?)
    }

    /// The raw master secret, for agent key derivation only.
    ///
    /// The buffer is zeroed when the returned value is dropped; keep it in
    /// scope no longer than the derivation.
    pub fn raw_secret(&self, proof: &PresenceProof) -> IdentityResult<Zeroizing<[u8; 32]>> {
        proof.ensure_fresh(self.proof_max_age)?;
        let _guard = self.lock_presence();

        let stored = self
            .key_store
            .read(MASTER_KEY_LABEL, Some(proof))?
            .ok_or_else(|| IdentityError::NotFound("master key".to_string()))?;
        if stored.len() != 32 {
            warn!(len = stored.len(), "Stored master key has unexpected length");
            return Err(IdentityError::InvalidState(format!(
                "master key must be 32 bytes, found {}",
                stored.len()
            )));
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(&stored);
        debug!("Master secret read");
        Ok(secret)
    }

    /// The master signing keypair; zeroized on drop.
    pub fn keypair(&self, proof: &PresenceProof) -> IdentityResult<Keypair> {
        let secret = self.raw_secret(proof)?;
        Ok(Keypair::from_secret_bytes(&secret[..])?)
    }

    /// Destroy the master key. Returns whether one existed.
    pub fn reset(&self, proof: &PresenceProof) -> IdentityResult<bool> {
        proof.ensure_fresh(self.proof_max_age)?;
        let _guard = self.lock_presence();
        let removed = self.key_store.delete(MASTER_KEY_LABEL)?;
        if removed {
            warn!("Master identity destroyed");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for MasterIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterIdentityStore")
            .field("proof_max_age", &self.proof_max_age)
            .finish_non_exhaustive()
    }
}
