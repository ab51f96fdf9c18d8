//! secp256k1 keypairs and recoverable signatures.
//!
//! Signatures are 65 bytes `r ‖ s ‖ v` with `v = 27 + recovery_id`, so a
//! verifier needs only the signer's address, never the public key.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use crate::address::{address_from_public_key, OsaurusId};
use crate::error::{CryptoError, Result};
use crate::hashing::domain_separated_hash;
use crate::random::{random_secret, SecureRandom};

/// Length of a serialized recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// Offset added to the recovery id in the `v` byte.
const RECOVERY_ID_OFFSET: u8 = 27;

/// Attempts before giving up on drawing a valid scalar; each draw fails with
/// probability about 2^-128.
const MAX_KEYGEN_ATTEMPTS: usize = 4;

/// A secp256k1 signing key together with its derived address.
///
/// The secret scalar is zeroized when the keypair is dropped.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: OsaurusId,
}

impl Keypair {
    /// Build a keypair from a 32-byte big-endian secret scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(secret)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let address = address_from_public_key(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Draw a fresh secret from `rng`, returning it with its keypair.
    ///
    /// The raw secret is returned so callers can hand it to a key store.
    pub fn generate(rng: &dyn SecureRandom) -> Result<(Zeroizing<[u8; 32]>, Self)> {
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            let secret: Zeroizing<[u8; 32]> = random_secret(rng)?;
            if let Ok(keypair) = Self::from_secret_bytes(&secret[..]) {
                return Ok((secret, keypair));
            }
        }
        Err(CryptoError::InvalidPrivateKey(
            "random source produced no valid secp256k1 scalar".to_string(),
        ))
    }

    pub fn address(&self) -> OsaurusId {
        self.address
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a 32-byte digest.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<RecoverableSignature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte() + RECOVERY_ID_OFFSET;
        Ok(RecoverableSignature(bytes))
    }

    /// Sign `message` under `domain` (see [`domain_separated_hash`]).
    pub fn sign_in_domain(&self, domain: &str, message: &[u8]) -> Result<RecoverableSignature> {
        self.sign_prehash(&domain_separated_hash(domain, message))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// A 65-byte `r ‖ s ‖ v` ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; SIGNATURE_LEN]);

impl RecoverableSignature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn recovery_id(&self) -> Result<RecoveryId> {
        let raw = self.0[64];
        let id = match raw {
            27 | 28 => raw - RECOVERY_ID_OFFSET,
            0 | 1 => raw,
            _ => {
                return Err(CryptoError::InvalidSignature(format!(
                    "recovery id must be 0/1 or 27/28, got {raw}"
                )))
            }
        };
        RecoveryId::try_from(id).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Recover the signer's address from a 32-byte digest.
    pub fn recover_address(&self, digest: &[u8; 32]) -> Result<OsaurusId> {
        let signature = Signature::from_slice(&self.0[..64])
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let recovery_id = self.recovery_id()?;
        let verifying_key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
        Ok(address_from_public_key(&verifying_key))
    }

    /// Recover the signer of `message` under `domain`.
    pub fn recover_in_domain(&self, domain: &str, message: &[u8]) -> Result<OsaurusId> {
        self.recover_address(&domain_separated_hash(domain, message))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{ACCESS_KEY_DOMAIN, REQUEST_TOKEN_DOMAIN};
    use crate::random::SequenceRandom;

    fn test_keypair() -> Keypair {
        Keypair::from_secret_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let keypair = test_keypair();
        let signature = keypair.sign_in_domain(ACCESS_KEY_DOMAIN, b"hello").unwrap();
        assert!(matches!(signature.as_bytes()[64], 27 | 28));

        let recovered = signature.recover_in_domain(ACCESS_KEY_DOMAIN, b"hello").unwrap();
        assert_eq!(recovered, keypair.address());
    }

    #[test]
    fn test_signing_is_deterministic() {
        // RFC 6979 nonces
        let keypair = test_keypair();
        let a = keypair.sign_in_domain(REQUEST_TOKEN_DOMAIN, b"m").unwrap();
        let b = keypair.sign_in_domain(REQUEST_TOKEN_DOMAIN, b"m").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cross_domain_recovery_mismatch() {
        let keypair = test_keypair();
        let message = b"{\"act\":\"GET /v1/models\"}";

        let request_sig = keypair.sign_in_domain(REQUEST_TOKEN_DOMAIN, message).unwrap();
        let access_sig = keypair.sign_in_domain(ACCESS_KEY_DOMAIN, message).unwrap();

        // Recovery under the wrong domain yields some other key, or fails outright.
        let wrong = request_sig.recover_in_domain(ACCESS_KEY_DOMAIN, message);
        assert!(wrong.map(|a| a != keypair.address()).unwrap_or(true));
        let wrong = access_sig.recover_in_domain(REQUEST_TOKEN_DOMAIN, message);
        assert!(wrong.map(|a| a != keypair.address()).unwrap_or(true));
    }

    #[test]
    fn test_raw_recovery_id_accepted() {
        let keypair = test_keypair();
        let signature = keypair.sign_in_domain(ACCESS_KEY_DOMAIN, b"x").unwrap();
        let mut raw = *signature.as_bytes();
        raw[64] -= 27;
        let normalized = RecoverableSignature::from_slice(&raw).unwrap();
        assert_eq!(
            normalized.recover_in_domain(ACCESS_KEY_DOMAIN, b"x").unwrap(),
            keypair.address()
        );
    }

    #[test]
    fn test_bad_recovery_id_rejected() {
        let keypair = test_keypair();
        let signature = keypair.sign_in_domain(ACCESS_KEY_DOMAIN, b"x").unwrap();
        let mut raw = *signature.as_bytes();
        raw[64] = 5;
        let broken = RecoverableSignature::from_slice(&raw).unwrap();
        assert!(matches!(
            broken.recover_in_domain(ACCESS_KEY_DOMAIN, b"x"),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_length_enforced() {
        assert!(RecoverableSignature::from_slice(&[0u8; 64]).is_err());
        assert!(RecoverableSignature::from_hex(&"ab".repeat(66)).is_err());
        assert!(RecoverableSignature::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(matches!(
            Keypair::from_secret_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn test_generate_returns_matching_secret() {
        let rng = SequenceRandom::new(3);
        let (secret, keypair) = Keypair::generate(&rng).unwrap();
        let rebuilt = Keypair::from_secret_bytes(&secret[..]).unwrap();
        assert_eq!(rebuilt.address(), keypair.address());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let rendered = format!("{:?}", test_keypair());
        assert!(rendered.contains("address"));
        assert!(!rendered.contains("0707070707"));
    }
}
