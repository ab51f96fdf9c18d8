//! Error types for identity, signing and issuance operations.
//!
//! Access-key validation does not use these: its outcomes are values of
//! [`crate::validator::ValidationResult`] so request paths never branch on
//! `Err`.

use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A master identity is already present
    #[error("Identity already exists: {0}")]
    AlreadyExists(String),

    /// Requested record or key material does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation needs a fresh presence proof and none (or a stale one) was given
    #[error("User presence required: {0}")]
    PresenceRequired(String),

    /// The user declined or failed the presence check
    #[error("User presence denied: {0}")]
    PresenceDenied(String),

    /// Hardware attester unreachable or refused to assert
    #[error("Attestation failed: {0}")]
    AttestationFailed(String),

    /// A persisted counter would move backwards
    #[error("Counter regression for {device_id}: stored {stored}, attempted {attempted}")]
    CounterRegression {
        device_id: String,
        stored: u64,
        attempted: u64,
    },

    /// Address is neither the master nor a registered agent
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Request token failed verification
    #[error("Invalid request token: {0}")]
    InvalidToken(String),

    /// A counter would pass the largest value the database can hold
    #[error("Counter overflow for {device_id}: {attempted} exceeds {max}")]
    CounterOverflow {
        device_id: String,
        attempted: u64,
        max: u64,
    },

    /// Cryptographic errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] osaurus_crypto::CryptoError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core errors
    #[error("Core error: {0}")]
    Core(#[from] osaurus_core::CoreError),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
