//! Keyed payload authentication (HMAC-SHA256)
//!
//! The digest covers exactly the serialized `data` body of an envelope and is
//! carried hex-encoded in `meta.hmac`.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Errors raised while provisioning the authenticator
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication secret is missing or empty")]
    MissingSecret,

    #[error("authentication secret rejected: {0}")]
    InvalidKey(String),
}

/// Signs and verifies envelope bodies with a pre-shared secret
#[derive(Clone)]
pub struct Authenticator {
    /// Keyed MAC state, cloned for every digest
    mac: HmacSha256,
}

impl Authenticator {
    /// Create an authenticator; an empty secret fails closed
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Create an authenticator from an environment variable
    pub fn from_env(var: &str) -> Result<Self, AuthError> {
        let secret = std::env::var(var).map_err(|_| AuthError::MissingSecret)?;
        Self::new(secret)
    }

    /// Hex digest of `body`
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a hex digest against `body` in constant time
    pub fn verify(&self, body: &[u8], digest_hex: &str) -> bool {
        let Ok(expected) = hex::decode(digest_hex) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("key", &"<redacted>")
            .finish()
    }
}
