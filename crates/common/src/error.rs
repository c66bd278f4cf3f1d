//! Error types for Gatehub
//!
//! Custom error enum that wraps all possible error types in the platform.
//! The variants mirror the failure taxonomy the core distinguishes:
//! validation, not-found, transient I/O, auth, and fatal startup errors.

use thiserror::Error;

/// Main error type for Gatehub operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input: bad port, duplicate name, malformed fingerprint.
    /// Surfaced to the caller, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity absent from storage or memory
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient I/O failure: probe failed, dial refused, storage busy.
    /// Feeds hysteresis or reconnect loops rather than immediate failure.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Authentication/authorization failures, classified separately so
    /// callers can answer with the right wire code
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Misconfiguration discovered at start; fails the component's start
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Invalid JWT token
    #[error("Invalid JWT token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// Password hashing errors
    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Wrap an I/O-ish failure with operation context
    pub fn transient(op: &str, err: impl std::fmt::Display) -> Self {
        Error::Transient(format!("{op}: {err}"))
    }
}

/// Result type alias for Gatehub operations
pub type Result<T> = std::result::Result<T, Error>;
