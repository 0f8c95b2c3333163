//! Error handling for slotwatch

use std::fmt;
use slotwatch_postgrest::PostgrestError;
use slotwatch_realtime::RealtimeError;
use thiserror::Error;

/// Unified error type for slotwatch
#[derive(Error, Debug)]
pub enum Error {
    /// Store (PostgREST) request errors
    #[error("Store error: {0}")]
    Store(#[from] PostgrestError),

    /// Change feed errors
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Email rejected before reaching the store
    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }
}

/// Outcome reported to whoever submitted an email address.
///
/// Store failures are collapsed into [`RegistrationError::Failed`]; the
/// underlying error is logged, never returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Enter a valid email address.")]
    InvalidEmail,

    #[error("Something went wrong. Try again.")]
    Failed,
}

impl RegistrationError {
    /// Whether submitting the same address again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistrationError::Failed)
    }
}
