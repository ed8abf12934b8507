//! Password hashing collaborator.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;

use crate::error::HashError;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;

/// CPU-bound hashing, exposed as async so callers never block the
/// connection event loop.
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String, HashError>;
    async fn verify(&self, password: &str, encoded: &str) -> Result<bool, HashError>;
}

/// PBKDF2-HMAC-SHA256. Encoded as `pbkdf2-sha256$<rounds>$<salt>$<digest>`.
#[derive(Clone, Debug)]
pub struct Pbkdf2PasswordHasher {
    iterations: u32,
}

impl Pbkdf2PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }
}

impl Default for Pbkdf2PasswordHasher {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn decode(encoded: &str) -> Result<(u32, Vec<u8>, Vec<u8>), HashError> {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(digest), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HashError::Malformed);
    };
    let iterations = match iterations.parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => return Err(HashError::Malformed),
    };
    let salt = STANDARD_NO_PAD.decode(salt).map_err(|_| HashError::Malformed)?;
    let digest = STANDARD_NO_PAD.decode(digest).map_err(|_| HashError::Malformed)?;
    Ok((iterations, salt, digest))
}

#[async_trait]
impl PasswordHasher for Pbkdf2PasswordHasher {
    async fn hash(&self, password: &str) -> Result<String, HashError> {
        let password = password.to_owned();
        let iterations = self.iterations;
        tokio::task::spawn_blocking(move || {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            let digest = derive(password.as_bytes(), &salt, iterations);
            format!(
                "{SCHEME}${iterations}${}${}",
                STANDARD_NO_PAD.encode(salt),
                STANDARD_NO_PAD.encode(digest)
            )
        })
        .await
        .map_err(|e| HashError::Worker(e.to_string()))
    }

    async fn verify(&self, password: &str, encoded: &str) -> Result<bool, HashError> {
        let (iterations, salt, expected) = decode(encoded)?;
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let actual = derive(password.as_bytes(), &salt, iterations);
            constant_time_eq(&actual, &expected)
        })
        .await
        .map_err(|e| HashError::Worker(e.to_string()))
    }
}
