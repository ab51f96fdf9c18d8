//! Configuration management for the identity engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub attestation: AttestationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// SQLite file holding whitelist, revocation, counter and registry state.
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenConfig {
    /// Lifetime of an internal request token.
    pub request_ttl_secs: u64,
    /// Tolerated clock drift when verifying request tokens.
    pub clock_skew_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceConfig {
    /// How long a presence proof stays usable after the prompt succeeded.
    pub proof_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttestationConfig {
    /// Probe for a hardware attester before falling back to software.
    pub prefer_hardware: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            request_ttl_secs: 60,
            clock_skew_secs: 5,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            proof_max_age_secs: 30,
        }
    }
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            prefer_hardware: true,
        }
    }
}

impl IdentityConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig {
                database_path: PathBuf::from("osaurus-identity.db"),
            },
            tokens: TokenConfig::default(),
            presence: PresenceConfig::default(),
            attestation: AttestationConfig::default(),
        }
    }

    /// Reject values that would make tokens unusable or presence proofs meaningless.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tokens.request_ttl_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "tokens.request_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.presence.proof_max_age_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "presence.proof_max_age_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig(
                "storage.database_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
