//! Deterministic per-agent key derivation.
//!
//! `child = HMAC-SHA512(master_secret, "osaurus-agent-v1" ‖ be32(index))[..32]`
//!
//! Child keys are never stored; they are re-derived from the presence-gated
//! master secret whenever an agent needs to sign. Without the master secret
//! the child addresses are unlinkable to each other and to the master.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

use crate::address::OsaurusId;
use crate::error::{CryptoError, Result};
use crate::keys::Keypair;

type HmacSha512 = Hmac<Sha512>;

/// Context string mixed into every agent derivation.
pub const AGENT_DERIVATION_CONTEXT: &[u8] = b"osaurus-agent-v1";

/// Stateless deriver for agent keypairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AgentKeyDeriver;

impl AgentKeyDeriver {
    /// Derive the keypair for agent `index` under `master_secret`.
    pub fn derive(master_secret: &[u8], index: u32) -> Result<(Keypair, OsaurusId)> {
        let child = Self::child_secret(master_secret, index)?;
        let keypair = Keypair::from_secret_bytes(&child[..]).map_err(|e| {
            CryptoError::DerivationFailed(format!("index {index} produced an invalid scalar: {e}"))
        })?;
        let address = keypair.address();
        Ok((keypair, address))
    }

    /// Address only; the keypair is dropped (and zeroized) immediately.
    pub fn derive_address(master_secret: &[u8], index: u32) -> Result<OsaurusId> {
        Self::derive(master_secret, index).map(|(_, address)| address)
    }

    fn child_secret(master_secret: &[u8], index: u32) -> Result<Zeroizing<[u8; 32]>> {
        if master_secret.is_empty() {
            return Err(CryptoError::DerivationFailed(
                "master secret must not be empty".to_string(),
            ));
        }
        let mut mac = HmacSha512::new_from_slice(master_secret)
            .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
        mac.update(AGENT_DERIVATION_CONTEXT);
        mac.update(&index.to_be_bytes());
        let mut output = mac.finalize().into_bytes();

        let mut child = Zeroizing::new([0u8; 32]);
        child.copy_from_slice(&output[..32]);
        output.as_mut_slice().zeroize();
        Ok(child)
    }
}
