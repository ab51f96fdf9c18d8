//! Self-certifying addresses (`OsaurusId`).
//!
//! An address is the last 20 bytes of the Keccak-256 hash of an uncompressed
//! secp256k1 public key, rendered as EIP-55 mixed-case hex. Casing is only a
//! checksum: equality, hashing and storage all use the lowercase form.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CryptoError, Result};
use crate::hashing::keccak256;

/// Byte length of an address.
pub const ADDRESS_LEN: usize = 20;

/// A checksummed 20-byte public-key hash.
#[derive(Clone, Copy)]
pub struct OsaurusId {
    bytes: [u8; ADDRESS_LEN],
}

impl OsaurusId {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.bytes
    }

    /// `0x`-prefixed lowercase hex; the canonical storage form.
    pub fn to_lowercase_hex(&self) -> String {
        format!("0x{}", hex::encode(self.bytes))
    }

    /// `0x`-prefixed EIP-55 checksummed hex.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.bytes);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// True when `input` is all-lowercase, all-uppercase, or correctly checksummed.
    pub fn has_valid_checksum(input: &str) -> bool {
        let digits = input.strip_prefix("0x").unwrap_or(input);
        if digits.len() != ADDRESS_LEN * 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if !(has_lower && has_upper) {
            return true;
        }
        match input.parse::<OsaurusId>() {
            Ok(id) => id.to_checksum()[2..] == *digits,
            Err(_) => false,
        }
    }
}

/// Derive the address of an uncompressed secp256k1 public key.
///
/// The leading `0x04` SEC1 tag is dropped before hashing.
pub fn address_from_public_key(public_key: &VerifyingKey) -> OsaurusId {
    let encoded = public_key.to_encoded_point(false);
    let digest = keccak256(&encoded.as_bytes()[1..]);
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[12..]);
    OsaurusId::from_bytes(bytes)
}

impl FromStr for OsaurusId {
    type Err = CryptoError;

    /// Parses any casing; checksum casing is cosmetic and not enforced here.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| CryptoError::InvalidAddress(format!("missing 0x prefix: {s}")))?;
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(CryptoError::InvalidAddress(format!(
                "expected {} hex digits, got {}",
                ADDRESS_LEN * 2,
                digits.len()
            )));
        }
        let decoded =
            hex::decode(digits).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_bytes(bytes))
    }
}

impl PartialEq for OsaurusId {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for OsaurusId {}

impl Hash for OsaurusId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for OsaurusId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OsaurusId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for OsaurusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for OsaurusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OsaurusId({})", self.to_checksum())
    }
}

impl Serialize for OsaurusId {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for OsaurusId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
