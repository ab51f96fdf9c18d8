//! User-presence gating.
//!
//! Operations that touch the master secret take a [`PresenceProof`] argument,
//! so the requirement is visible in every signature. Proofs come from a
//! [`PresenceGate`] (biometric prompt, device passcode, or an auto-approving
//! gate for headless use) and go stale after a configured age.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IdentityError, IdentityResult};

/// How the user demonstrated presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceMethod {
    Biometric,
    DevicePasscode,
    /// Headless operation with no interactive user
    Headless,
}

/// Evidence that a live user authorized an operation.
#[derive(Debug, Clone)]
pub struct PresenceProof {
    method: PresenceMethod,
    obtained_at: Instant,
}

impl PresenceProof {
    /// Record a successful presence check that happened just now.
    ///
    /// Trust boundary: this is public so platform gates outside this crate can
    /// mint proofs, and nothing here can tell a gate-issued proof from a
    /// hand-made one. Code holding a `MasterIdentityStore` directly is trusted
    /// to call it only after a real prompt. [`crate::IdentityService`] never
    /// accepts a proof from its callers; every gated operation obtains one from
    /// the gate it was opened with.
    pub fn new(method: PresenceMethod) -> Self {
        Self {
            method,
            obtained_at: Instant::now(),
        }
    }

    pub fn method(&self) -> PresenceMethod {
        self.method
    }

    pub fn age(&self) -> Duration {
        self.obtained_at.elapsed()
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }

    /// `PresenceRequired` unless the proof is younger than `max_age`.
    pub fn ensure_fresh(&self, max_age: Duration) -> IdentityResult<()> {
        if self.is_fresh(max_age) {
            Ok(())
        } else {
            Err(IdentityError::PresenceRequired(format!(
                "presence proof is {}s old (limit {}s)",
                self.age().as_secs(),
                max_age.as_secs()
            )))
        }
    }
}

/// Source of presence proofs.
///
/// `obtain_proof` blocks until the user answers the prompt; it is never polled.
pub trait PresenceGate: Send + Sync {
    fn obtain_proof(&self, reason: &str) -> IdentityResult<PresenceProof>;
}

/// Approves every request without prompting.
///
/// For headless deployments and tests only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprovePresenceGate;

impl PresenceGate for AutoApprovePresenceGate {
    fn obtain_proof(&self, reason: &str) -> IdentityResult<PresenceProof> {
        debug!(reason, "Presence auto-approved");
        Ok(PresenceProof::new(PresenceMethod::Headless))
    }
}

/// Denies every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyingPresenceGate;

impl PresenceGate for DenyingPresenceGate {
    fn obtain_proof(&self, reason: &str) -> IdentityResult<PresenceProof> {
        warn!(reason, "Presence denied");
        Err(IdentityError::PresenceDenied(reason.to_string()))
    }
}
