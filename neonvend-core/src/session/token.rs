use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::domain::LeaseHolder;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("token generation failed: {0}")]
    GenerationFailed(String),

    #[error("token HMAC key must not be empty")]
    EmptyTokenKey,
}

/// Opaque bearer token handed to a client.
///
/// 256 bits from the OS RNG, URL-safe base64 without padding. The value is
/// wiped from memory on drop and only a short preview is ever displayed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
}

impl SessionToken {
    /// Draw a fresh token from the OS RNG.
    pub fn generate() -> Result<Self, SessionTokenError> {
        let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(|err| SessionTokenError::GenerationFailed(err.to_string()))?;

        Ok(Self {
            value: URL_SAFE_NO_PAD.encode(&bytes[..]),
        })
    }

    /// Wrap a token presented by a client. No format checks: an unknown
    /// value simply fails lookup.
    pub fn from_presented(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// First eight characters, safe for logs.
    pub fn preview(&self) -> String {
        let preview: String = self.value.chars().take(8).collect();
        format!("{preview}...")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.preview())
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Keyed digest from session token to [`LeaseHolder`].
///
/// HMAC-SHA-256 under a deployment key, hex encoded. The directory indexes
/// sessions by this digest and the ledger persists it as the lease holder.
pub struct TokenDigester {
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for TokenDigester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenDigester")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl TokenDigester {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, SessionTokenError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(SessionTokenError::EmptyTokenKey);
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Digester with a random per-process key. Digests do not survive a
    /// restart, which matches the in-memory session lifetime.
    pub fn ephemeral() -> Result<Self, SessionTokenError> {
        let mut key = Zeroizing::new(vec![0u8; TOKEN_BYTES]);
        OsRng
            .try_fill_bytes(key.as_mut_slice())
            .map_err(|err| SessionTokenError::GenerationFailed(err.to_string()))?;
        Ok(Self { key })
    }

    pub fn holder_for(&self, token: &SessionToken) -> LeaseHolder {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(token.as_str().as_bytes());
        LeaseHolder::from_digest(hex::encode(mac.finalize().into_bytes()))
    }
}
