//! Authentication helpers
//!
//! JWT token management, password hashing, and the `Authorization` header
//! contract shared by subscription streams and the tunnel control plane:
//! `Basic base64(user:password)` validated against a user store, or
//! `Bearer <token>` validated by a pluggable token validator.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time (unix timestamp)
    pub iat: usize,  // Issued at (unix timestamp)
}

/// Create a JWT token
pub fn create_jwt(user_id: &str, secret: &str, expires_in_seconds: i64) -> Result<String> {
    let now = Utc::now();
    let expiration = now + Duration::seconds(expires_in_seconds);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify and decode a JWT token
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String> {
    let cost = 12;
    let hash = bcrypt::hash(password, cost)?;
    Ok(hash)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let valid = bcrypt::verify(password, hash)?;
    Ok(valid)
}

/// Parsed `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic { user_id: String, password: String },
    Bearer { token: String },
}

/// Parse an `Authorization` header value into its scheme
///
/// Missing or malformed input maps to `Error::Auth` so callers can answer
/// with an UNAUTHENTICATED wire code.
pub fn parse_authorization(header: Option<&str>) -> Result<AuthScheme> {
    let header = header.ok_or_else(|| Error::Auth("missing authorization header".to_string()))?;

    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| Error::Auth("malformed basic credentials".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::Auth("malformed basic credentials".to_string()))?;
        let (user_id, password) = decoded
            .split_once(':')
            .ok_or_else(|| Error::Auth("malformed basic credentials".to_string()))?;
        return Ok(AuthScheme::Basic {
            user_id: user_id.to_string(),
            password: password.to_string(),
        });
    }

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Auth("empty bearer token".to_string()));
        }
        return Ok(AuthScheme::Bearer {
            token: token.to_string(),
        });
    }

    Err(Error::Auth("unsupported authorization scheme".to_string()))
}

/// Connection-scope annotations produced by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    /// "basic" or "bearer"
    pub auth_type: &'static str,
    pub user_id: String,
    pub username: String,
    pub tenant_id: String,
}

/// User credential lookup, backed by the admin user store
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns `(password_hash, username, tenant_id)` for a user id
    async fn lookup(&self, user_id: &str) -> Result<Option<(String, String, String)>>;
}

/// Opaque token validation (JWT, API key, ...)
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Returns the annotated outcome for a valid token
    async fn validate(&self, token: &str) -> Result<AuthOutcome>;
}

/// Runtime feature toggles consumed by interceptors
pub trait ConfigProvider: Send + Sync {
    /// When false, auth interceptors short-circuit as authenticated
    fn enable_auth(&self) -> bool;
}

/// Token validator for HS256 JWTs minted by this platform
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<AuthOutcome> {
        let claims = verify_jwt(token, &self.secret)
            .map_err(|e| Error::Auth(format!("invalid bearer token: {e}")))?;
        Ok(AuthOutcome {
            authenticated: true,
            auth_type: "bearer",
            user_id: claims.sub.clone(),
            username: claims.sub,
            tenant_id: String::new(),
        })
    }
}

/// Validates `Authorization` metadata against the user store / token validator
pub struct Authenticator {
    users: Box<dyn UserStore>,
    tokens: Box<dyn TokenValidator>,
}

impl Authenticator {
    pub fn new(users: Box<dyn UserStore>, tokens: Box<dyn TokenValidator>) -> Self {
        Self { users, tokens }
    }

    /// Authenticate a connection from its `Authorization` header value
    pub async fn authenticate(&self, header: Option<&str>) -> Result<AuthOutcome> {
        match parse_authorization(header)? {
            AuthScheme::Basic { user_id, password } => {
                let (hash, username, tenant_id) = self
                    .users
                    .lookup(&user_id)
                    .await?
                    .ok_or_else(|| Error::Auth(format!("unknown user: {user_id}")))?;

                if !verify_password(&password, &hash)? {
                    return Err(Error::Auth("invalid credentials".to_string()));
                }

                Ok(AuthOutcome {
                    authenticated: true,
                    auth_type: "basic",
                    user_id,
                    username,
                    tenant_id,
                })
            }
            AuthScheme::Bearer { token } => self.tokens.validate(&token).await,
        }
    }
}
