//! Authenticated coin pulses turned into machine credit.
//!
//! Hardware signs `machineId:pulseCount:timestamp` with HMAC-SHA-256. A pulse
//! is credited only if the signature matches, the timestamp passes the
//! deployment's [`replay::ReplayPolicy`], and the machine holds a valid lease.

pub mod ingestor;
pub mod replay;
pub mod signature;

use thiserror::Error;

use crate::clock::ExpiryOverflow;
use crate::domain::MachineId;
use crate::error::{ErrorKind, StoreError};

pub use ingestor::{CoinPulse, CreditIngestor, CreditReceipt, KeyScope, PulseKeys};
pub use replay::{ReplayPolicy, TimestampKind, TimestampMode};
pub use signature::{EmptyPulseKey, PulseKey, canonical_message, sign_pulse};

/// Why a pulse failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("signature mismatch")]
    BadSignature,
    #[error("signature is not 64 hex characters")]
    MalformedSignature,
    #[error("timestamp outside the replay window")]
    StaleTimestamp,
    #[error("timestamp is not a non-negative integer")]
    MalformedTimestamp,
    #[error("unknown machine")]
    UnknownMachine,
    #[error("machine has no hardware key")]
    MissingMachineKey,
}

impl AuthFailure {
    pub fn is_timestamp(self) -> bool {
        matches!(
            self,
            AuthFailure::StaleTimestamp | AuthFailure::MalformedTimestamp
        )
    }
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("coin pulse authentication failed: {0}")]
    AuthFailed(AuthFailure),

    #[error("pulse count must be at least 1")]
    InvalidPulseCount,

    #[error("machine {0} has no valid lease")]
    NoLease(MachineId),

    #[error("renewal window overflows: {0}")]
    ExpiryOverflow(#[from] ExpiryOverflow),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CreditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CreditError::AuthFailed(_) => ErrorKind::Auth,
            CreditError::InvalidPulseCount => ErrorKind::Validation,
            CreditError::NoLease(_) => ErrorKind::Conflict,
            CreditError::ExpiryOverflow(_) => ErrorKind::Internal,
            CreditError::Store(err) => err.kind(),
        }
    }
}
