//! Cryptographic primitives for the Osaurus identity engine.
//!
//! This crate provides the pure, stateless half of the engine: address
//! derivation, domain-separated hashing, secp256k1 recoverable signatures,
//! deterministic agent key derivation and recovery codes.
//!
//! # Supported Algorithms
//!
//! - **Signatures**: ECDSA over secp256k1, 65-byte recoverable `r ‖ s ‖ v`
//! - **Addressing**: Keccak-256 public-key hash with EIP-55 checksum casing
//! - **Derivation**: HMAC-SHA512 keyed by the master secret
//! - **Attestation digests**: SHA-256
//!
//! # Security Principles
//!
//! - Secrets are held in `Zeroizing` buffers or zeroize-on-drop keys
//! - Secrets are never logged or rendered by `Debug`
//! - Every signature is bound to a protocol domain

pub mod address;
pub mod derivation;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod random;
pub mod recovery;

#[cfg(test)]
mod test_vectors;

pub use address::{address_from_public_key, OsaurusId, ADDRESS_LEN};
pub use derivation::{AgentKeyDeriver, AGENT_DERIVATION_CONTEXT};
pub use error::{CryptoError, Result};
pub use hashing::{
    domain_prefix_envelope, domain_separated_hash, keccak256, sha256, ACCESS_KEY_DOMAIN,
    REQUEST_TOKEN_DOMAIN,
};
pub use keys::{Keypair, RecoverableSignature, SIGNATURE_LEN};
pub use random::{random_secret, OsRandom, SecureRandom, SequenceRandom};
pub use recovery::{RecoveryCodeGenerator, RECOVERY_CODE_PREFIX};
