//! Error types for address, key and signature operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Text that is not a 0x-prefixed 20-byte hex address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Bytes that are not a usable secp256k1 secret scalar
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Signature of the wrong length or with a bad recovery id
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Public key recovery from a signature failed
    #[error("Signature recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    /// The OS random source could not be read
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
