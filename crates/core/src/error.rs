//! Core error types

use thiserror::Error;

/// Core error type for the Osaurus identity stack
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration values that parse but make no sense together
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
