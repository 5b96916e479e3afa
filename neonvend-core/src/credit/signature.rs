use std::fmt;

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::AuthFailure;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("hardware HMAC secret must not be empty")]
pub struct EmptyPulseKey;

/// String the hardware signs: `machineId:pulseCount:timestamp`, with the
/// timestamp exactly as transmitted.
pub fn canonical_message(machine_id: &str, pulse_count: u32, timestamp: &str) -> String {
    format!("{machine_id}:{pulse_count}:{timestamp}")
}

/// Shared secret used to sign and verify coin pulses.
#[derive(Clone)]
pub struct PulseKey {
    secret: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for PulseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseKey")
            .field("len", &self.secret.len())
            .finish()
    }
}

impl PulseKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, EmptyPulseKey> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(EmptyPulseKey);
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    fn mac(&self, message: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(message.as_bytes());
        mac
    }

    /// Lowercase hex HMAC-SHA-256 of `message`.
    pub fn sign(&self, message: &str) -> String {
        hex::encode(self.mac(message).finalize().into_bytes())
    }

    /// Check a hex signature (either case) against `message` in constant
    /// time.
    pub fn verify(&self, message: &str, signature: &str) -> Result<(), AuthFailure> {
        let provided = hex::decode(signature.trim()).map_err(|_| AuthFailure::MalformedSignature)?;
        if provided.len() != SIGNATURE_BYTES {
            return Err(AuthFailure::MalformedSignature);
        }

        let expected = self.mac(message).finalize().into_bytes();
        if constant_time_eq(expected.as_slice(), &provided) {
            Ok(())
        } else {
            Err(AuthFailure::BadSignature)
        }
    }
}

/// Sign a coin pulse the way the hardware does. Used by bench tooling and
/// tests.
pub fn sign_pulse(
    secret: impl AsRef<[u8]>,
    machine_id: &str,
    pulse_count: u32,
    timestamp: &str,
) -> Result<String, EmptyPulseKey> {
    let key = PulseKey::new(secret)?;
    Ok(key.sign(&canonical_message(machine_id, pulse_count, timestamp)))
}
