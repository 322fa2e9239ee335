//! # API Tokens
//!
//! The signing key is 32 random bytes, stored base64-encoded. Tokens are
//! HS256 over the decoded key bytes with `iss`, `iat`, `exp` and `role` claims.

use crate::constants::{JWT_ISSUER, JWT_LIFETIME_SECS, RANDOM_KEY_BYTES};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read random bytes: {0}")]
    Random(String),

    #[error("signing key cannot be empty")]
    EmptySigningKey,

    #[error("signing key is not valid base64: {0}")]
    InvalidSigningKey(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Role discriminator carried in issued tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRole {
    Anon,
    ServiceRole,
}

impl TokenRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenRole::Anon => "anon",
            TokenRole::ServiceRole => "service_role",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Base64 of 32 bytes from the OS random source
pub fn generate_random_key() -> Result<Zeroizing<String>, TokenError> {
    let mut bytes = Zeroizing::new([0u8; RANDOM_KEY_BYTES]);
    OsRng
        .try_fill_bytes(&mut bytes[..])
        .map_err(|e| TokenError::Random(e.to_string()))?;
    Ok(Zeroizing::new(STANDARD.encode(&bytes[..])))
}

/// Issue a token for `role`, valid for ten years from `issued_at`
pub fn issue_token(
    signing_key: &str,
    role: TokenRole,
    issued_at: i64,
) -> Result<String, TokenError> {
    if signing_key.is_empty() {
        return Err(TokenError::EmptySigningKey);
    }

    let key_bytes = Zeroizing::new(
        STANDARD
            .decode(signing_key)
            .map_err(|e| TokenError::InvalidSigningKey(e.to_string()))?,
    );

    let claims = Claims {
        role: role.as_str().to_string(),
        iss: JWT_ISSUER.to_string(),
        iat: issued_at,
        exp: issued_at + JWT_LIFETIME_SECS,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(&key_bytes))
        .map_err(|e| TokenError::Signing(e.to_string()))
}
