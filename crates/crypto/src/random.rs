//! Cryptographically secure randomness.

use std::sync::atomic::{AtomicU64, Ordering};

use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Source of secure random bytes, injectable so tests can be deterministic.
pub trait SecureRandom: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<()>;

    fn bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.fill(&mut out)?;
        Ok(out)
    }
}

/// Fixed-size random key material that is zeroed on drop.
pub fn random_secret<const N: usize>(rng: &dyn SecureRandom) -> Result<Zeroizing<[u8; N]>> {
    let mut out = Zeroizing::new([0u8; N]);
    rng.fill(&mut out[..])?;
    Ok(out)
}

/// Operating-system CSPRNG via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        getrandom::getrandom(dest).map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))
    }
}

/// Deterministic byte stream for tests.
///
/// Every call yields fresh bytes derived from `seed` and an internal counter,
/// so repeated calls never return the same output.
///
/// ⚠️ Never use outside tests: the output is fully predictable.
#[derive(Debug)]
pub struct SequenceRandom {
    seed: u64,
    calls: AtomicU64,
}

impl SequenceRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            calls: AtomicU64::new(0),
        }
    }
}

impl SecureRandom for SequenceRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut block = 0u64;
        let mut chunk = [0u8; 32];
        for (i, byte) in dest.iter_mut().enumerate() {
            if i % 32 == 0 {
                let mut input = Vec::with_capacity(24);
                input.extend_from_slice(&self.seed.to_be_bytes());
                input.extend_from_slice(&call.to_be_bytes());
                input.extend_from_slice(&block.to_be_bytes());
                chunk = crate::hashing::sha256(&input);
                block += 1;
            }
            *byte = chunk[i % 32];
        }
        Ok(())
    }
}
