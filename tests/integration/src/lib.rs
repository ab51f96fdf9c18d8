//! End-to-end tests for the Osaurus identity engine
//!
//! This test suite validates:
//! - Access-key issuance, validation and revocation through the service facade
//! - Request-token signing, verification and replay rejection
//! - Domain separation between request tokens and access keys
//! - Concurrent validation while validators are republished
//! - Presence denial and attestation failures failing closed

pub mod test_utils;

#[cfg(test)]
mod access_key_scenarios;

#[cfg(test)]
mod request_token_tests;

#[cfg(test)]
mod concurrency_tests;

#[cfg(test)]
mod failure_mode_tests;
