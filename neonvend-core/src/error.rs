use std::time::Duration;

use thiserror::Error;

/// Coarse classification shared by every ledger error.
///
/// The HTTP layer maps these onto status codes; callers use
/// [`ErrorKind::is_retryable`] to decide whether a request may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad secret, bad signature, stale timestamp or unknown hardware.
    Auth,
    /// Caller is authenticated but acting on something it does not own.
    Forbidden,
    /// State does not allow the operation right now (busy, no lease).
    Conflict,
    /// Unknown machine or exhausted voucher inventory.
    NotFound,
    /// Malformed input.
    Validation,
    /// Store timed out or was unreachable.
    Transient,
    /// The server cannot complete the request as configured, e.g. a TTL
    /// that pushes an expiry past the representable calendar.
    Internal,
}

impl ErrorKind {
    /// Only transient failures may be retried as-is. Retrying after a
    /// transient failure of a write (acquire, redeem) still requires the
    /// caller to re-read state first.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Failure talking to the ledger store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The call did not finish within the configured store deadline. The
    /// write may or may not have been applied.
    #[error("store call exceeded its {0:?} deadline")]
    Timeout(Duration),

    /// No connection could be obtained (pool exhausted or closed, I/O, TLS).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the statement.
    #[error("store query failed: {0}")]
    Query(String),

    /// A row was read but did not decode into the expected shape.
    #[error("store returned inconsistent data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Every store failure is [`ErrorKind::Transient`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }

    #[cfg(feature = "database")]
    pub(crate) fn sqlx(context: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable(format!("{context}: connection pool timed out"))
            }
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StoreError::Unavailable(format!("{context}: {err}"))
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                StoreError::Corrupt(format!("{context}: {err}"))
            }
            other => StoreError::Query(format!("{context}: {other}")),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub use crate::credit::{AuthFailure, CreditError};
pub use crate::lease::LeaseError;
pub use crate::redemption::{LeaseDenial, RedemptionError};
pub use crate::session::SessionError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        for kind in [
            ErrorKind::Auth,
            ErrorKind::Forbidden,
            ErrorKind::Conflict,
            ErrorKind::NotFound,
            ErrorKind::Validation,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retryable(), "{kind:?} must be final");
        }
    }

    #[test]
    fn store_errors_are_transient() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("250ms"));
    }
}
