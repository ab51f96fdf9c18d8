//! Address-based identity and access keys for Osaurus.
//!
//! Every actor in an Osaurus installation (the human operator, each derived
//! agent, the physical device) holds a self-certifying address. Any of them can
//! sign requests and issue portable access keys that validate offline, with no
//! central server consulted at request time.
//!
//! # Core Concepts
//!
//! - **Master identity**: one presence-gated secp256k1 root key per operator
//! - **Agents**: child keys derived from the master by index, never stored
//! - **Device identity**: hardware-attested where possible, software otherwise
//! - **Request tokens**: short-lived, two-layer (key signature + device assertion)
//! - **Access keys**: long-lived `osk-v1` bearer keys, revocable by nonce or
//!   by counter threshold
//!
//! # Security Model
//!
//! - Reading the master secret requires a fresh [`PresenceProof`]
//! - Request tokens carry a monotonic per-device counter against replay
//! - Signatures are bound to a protocol domain, so request-token and
//!   access-key signatures are not interchangeable
//! - Validation is a pure function of immutable snapshots and never blocks on
//!   state changes
//!
//! # Integration Points
//!
//! [`IdentityService`] is the entry point for the API layer:
//! `sign_request`, `issue_access_key`, `validator_handle` and the management
//! operations. Platform keychains, presence prompts and hardware attesters
//! plug in through [`SecureKeyStore`], [`PresenceGate`] and
//! [`HardwareAttester`].

pub mod access_key;
pub mod agents;
pub mod counter;
pub mod device;
pub mod error;
pub mod keystore;
pub mod master;
pub mod presence;
pub mod revocation;
pub mod service;
pub mod storage;
pub mod token;
pub mod tpm;
pub mod validator;
pub mod whitelist;

pub use access_key::{
    AccessKeyInfo, AccessKeyIssuer, AccessKeyPayload, AccessKeyRegistry, ExpirationPolicy,
    ACCESS_KEY_VERSION,
};
pub use agents::{AgentInfo, AgentRegistry};
pub use counter::{CounterStore, InMemoryCounterStore, SqliteCounterStore, MAX_COUNTER};
pub use device::{DeviceAttester, HardwareDevice, SoftwareDevice};
pub use error::{IdentityError, IdentityResult};
pub use keystore::{InMemoryKeyStore, SecureKeyStore};
pub use master::{MasterIdentityStore, MASTER_KEY_LABEL};
pub use presence::{
    AutoApprovePresenceGate, DenyingPresenceGate, PresenceGate, PresenceMethod, PresenceProof,
};
pub use revocation::{RevocationSnapshot, RevocationStore};
pub use service::IdentityService;
pub use storage::IdentityDatabase;
pub use token::{
    ReplayGuard, RequestToken, RequestTokenSigner, RequestTokenVerifier, TokenHeader,
    TokenPayload, VerifiedRequest,
};
pub use tpm::{HardwareAttester, StubHardwareAttester};
pub use validator::{AccessKeyValidator, InvalidReason, ValidationResult, ValidatorHandle};
pub use whitelist::{WhitelistSnapshot, WhitelistStore};

// Re-export the address type for convenience
pub use osaurus_crypto::OsaurusId;
