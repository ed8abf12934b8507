//! Token signing and verification collaborator.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tally_core::Clock;

use crate::error::TokenError;

/// Decoded principal carried by a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    /// Issued at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

/// Outcome of verifying a presented token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid(Claims),
    Expired,
    Invalid,
}

pub trait TokenService: Send + Sync {
    fn sign(&self, username: &str) -> Result<String, TokenError>;

    /// Verify a token. A leading `"Bearer "` is ignored.
    fn verify(&self, token: &str) -> TokenVerdict;
}

/// Strip an optional `Bearer ` scheme prefix.
pub fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

/// HS256 JWTs with a secret supplied at construction.
pub struct JwtTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl JwtTokenService {
    pub fn new(secret: &SecretString, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
            ttl_secs,
            clock,
        }
    }
}

impl TokenService for JwtTokenService {
    fn sign(&self, username: &str) -> Result<String, TokenError> {
        let iat = self.clock.now_ms() / 1000;
        let claims = Claims {
            sub: username.to_owned(),
            iat,
            exp: iat + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Sign(e.to_string()))
    }

    fn verify(&self, token: &str) -> TokenVerdict {
        match decode::<Claims>(strip_bearer(token), &self.decoding, &self.validation) {
            Ok(data) => TokenVerdict::Valid(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => TokenVerdict::Expired,
            Err(_) => TokenVerdict::Invalid,
        }
    }
}
