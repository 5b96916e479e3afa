use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use neonvend_core::error::{AuthFailure, LeaseDenial};
use neonvend_core::{
    CreditError, ErrorKind, ExpiryOverflow, LeaseError, RedemptionError, SessionError, StoreError,
};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// Status for a ledger error class. Conflicts surface as 400, which is
    /// what kiosk clients already handle for a busy machine.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = match kind {
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "ledger store call failed");
        Self::unavailable("Ledger temporarily unavailable, retry shortly")
    }
}

impl From<ExpiryOverflow> for AppError {
    fn from(err: ExpiryOverflow) -> Self {
        tracing::error!(error = %err, "configured ttl pushes expiry out of range");
        Self::internal("Server misconfigured, contact the operator")
    }
}

impl From<LeaseError> for AppError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::UnknownMachine(_) => Self::not_found("Machine not found"),
            LeaseError::ExpiryOverflow(err) => err.into(),
            LeaseError::Store(err) => err.into(),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidMachineId(_) => Self::bad_request("Invalid machine ID"),
            SessionError::Token(err) => {
                tracing::error!(error = %err, "session token generation failed");
                Self::from_kind(ErrorKind::Transient, "Could not create session, retry shortly")
            }
            SessionError::ExpiryOverflow(err) => err.into(),
        }
    }
}

impl From<CreditError> for AppError {
    fn from(err: CreditError) -> Self {
        let kind = err.kind();
        match err {
            CreditError::AuthFailed(failure) if failure.is_timestamp() => {
                Self::from_kind(kind, "Timestamp expired or invalid")
            }
            CreditError::AuthFailed(AuthFailure::UnknownMachine | AuthFailure::MissingMachineKey) => {
                Self::from_kind(kind, "Unknown machine")
            }
            CreditError::AuthFailed(_) => Self::from_kind(kind, "Invalid signature"),
            CreditError::InvalidPulseCount => Self::from_kind(kind, "Pulse count must be at least 1"),
            CreditError::NoLease(_) => Self::from_kind(kind, "Machine not found or not locked"),
            CreditError::ExpiryOverflow(err) => err.into(),
            CreditError::Store(err) => err.into(),
        }
    }
}

impl From<RedemptionError> for AppError {
    fn from(err: RedemptionError) -> Self {
        let kind = err.kind();
        match err {
            RedemptionError::InvalidDuration(_) => {
                Self::from_kind(kind, "Invalid duration (1 minute to 7 days)")
            }
            RedemptionError::NoLease {
                denial: LeaseDenial::NotHeld,
                ..
            } => Self::from_kind(kind, "Machine not locked or lock expired"),
            RedemptionError::NoLease {
                denial: LeaseDenial::HeldByOther,
                ..
            } => Self::from_kind(kind, "This session does not own the lock"),
            RedemptionError::NoVoucherAvailable { .. } => {
                Self::from_kind(kind, "No vouchers available for this duration")
            }
            RedemptionError::UnknownMachine(_) => Self::from_kind(kind, "Machine not found"),
            RedemptionError::Store(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neonvend_core::{MachineId, VoucherDuration};
    use std::time::Duration;

    fn vm() -> MachineId {
        MachineId::parse("VM001").unwrap()
    }

    #[test]
    fn credit_failures_keep_the_hardware_messages() {
        let stale: AppError = CreditError::AuthFailed(AuthFailure::StaleTimestamp).into();
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
        assert_eq!(stale.message, "Timestamp expired or invalid");

        let forged: AppError = CreditError::AuthFailed(AuthFailure::BadSignature).into();
        assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
        assert_eq!(forged.message, "Invalid signature");

        let unleased: AppError = CreditError::NoLease(vm()).into();
        assert_eq!(unleased.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn redemption_denials_split_between_400_and_403() {
        let not_held: AppError = RedemptionError::NoLease {
            machine_id: vm(),
            denial: LeaseDenial::NotHeld,
        }
        .into();
        assert_eq!(not_held.status, StatusCode::BAD_REQUEST);

        let other: AppError = RedemptionError::NoLease {
            machine_id: vm(),
            denial: LeaseDenial::HeldByOther,
        }
        .into();
        assert_eq!(other.status, StatusCode::FORBIDDEN);

        let empty: AppError = RedemptionError::NoVoucherAvailable {
            machine_id: vm(),
            duration: VoucherDuration::from_minutes(60).unwrap(),
        }
        .into();
        assert_eq!(empty.status, StatusCode::NOT_FOUND);
        assert_eq!(empty.message, "No vouchers available for this duration");
    }

    #[test]
    fn expiry_overflow_is_an_opaque_500() {
        let overflow = ExpiryOverflow {
            start: chrono::Utc::now(),
            ttl: chrono::Duration::MAX,
        };
        for err in [
            AppError::from(LeaseError::ExpiryOverflow(overflow)),
            AppError::from(CreditError::ExpiryOverflow(overflow)),
            AppError::from(SessionError::ExpiryOverflow(overflow)),
        ] {
            assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(!err.message.contains("ttl"));
        }
        assert_eq!(
            AppError::from_kind(ErrorKind::Internal, "x").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_timeouts_are_service_unavailable() {
        let err: AppError = LeaseError::Store(StoreError::Timeout(Duration::from_secs(5))).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
