//! # Gatehub Common Library
//!
//! Shared utilities and infrastructure code used by all Gatehub services.
//!
//! This crate provides:
//! - Custom error types covering the platform's failure taxonomy
//! - JWT token creation and validation
//! - `Authorization` header parsing (Basic / Bearer) and the auth contract
//! - Password hashing and verification
//! - Trace id minting
//! - Structured logging setup

// Module declarations
pub mod auth;
pub mod error;
pub mod ids;
pub mod logging;

// Re-export commonly used types
pub use auth::{
    AuthOutcome, AuthScheme, Authenticator, Claims, ConfigProvider, JwtValidator, TokenValidator,
    UserStore, create_jwt, hash_password, parse_authorization, verify_jwt, verify_password,
};
pub use error::{Error, Result};
pub use ids::trace_id;
pub use logging::{init_tracing, init_tracing_json};
