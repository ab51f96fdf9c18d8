//! Hashing primitives and domain-separated message digests.
//!
//! Request tokens and access keys are signed under different domains so a
//! signature produced for one protocol never recovers to the expected signer
//! under the other.

use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Domain for internal request tokens.
pub const REQUEST_TOKEN_DOMAIN: &str = "Osaurus Signed Message";

/// Domain for portable `osk-v1` access keys.
pub const ACCESS_KEY_DOMAIN: &str = "Osaurus Signed Access";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `0x19 ‖ domain ‖ ":\n" ‖ decimal(len(message))`, the EIP-191 style envelope.
pub fn domain_prefix_envelope(domain: &str, message_len: usize) -> Vec<u8> {
    format!("\x19{domain}:\n{message_len}").into_bytes()
}

/// Keccak-256 over the domain envelope followed by the message.
pub fn domain_separated_hash(domain: &str, message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(domain_prefix_envelope(domain, message.len()));
    hasher.update(message);
    hasher.finalize().into()
}
