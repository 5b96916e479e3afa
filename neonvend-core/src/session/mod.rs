//! Bearer sessions bound to a machine.

pub mod directory;
pub mod token;

use thiserror::Error;

use crate::clock::ExpiryOverflow;
use crate::domain::InvalidMachineId;
use crate::error::ErrorKind;

pub use directory::{DEFAULT_SESSION_TTL, SessionDirectory, SessionRecord};
pub use token::{SessionToken, SessionTokenError, TokenDigester};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid machine id: {0}")]
    InvalidMachineId(#[from] InvalidMachineId),

    #[error(transparent)]
    Token(#[from] SessionTokenError),

    #[error("session ttl overflows: {0}")]
    ExpiryOverflow(#[from] ExpiryOverflow),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidMachineId(_) => ErrorKind::Validation,
            SessionError::Token(_) => ErrorKind::Transient,
            SessionError::ExpiryOverflow(_) => ErrorKind::Internal,
        }
    }
}
