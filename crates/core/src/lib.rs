//! Core functionality shared by the Osaurus identity crates.
//!
//! This crate provides configuration, logging bootstrap, the core error type
//! and the clock helpers used by every signing and validation path.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{AttestationConfig, IdentityConfig, PresenceConfig, StorageConfig, TokenConfig};
pub use error::{CoreError, Result};
pub use types::{unix_now_secs, UnixSeconds};
