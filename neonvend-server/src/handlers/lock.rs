use axum::{Json, extract::State};

use neonvend_core::AcquireOutcome;
use neonvend_core::api::{LockRequest, LockResponse};

use super::require_session;
use crate::{AppError, AppResult, AppState};

/// Take (or renew) exclusive use of a machine for the presented session.
pub async fn lock_machine(
    State(state): State<AppState>,
    Json(request): Json<LockRequest>,
) -> AppResult<Json<LockResponse>> {
    let session = require_session(&state, &request.machine_id, &request.session_id)?;

    match state
        .leases()
        .acquire(&session.machine_id, &session.holder)
        .await?
    {
        AcquireOutcome::Acquired(lease) => Ok(Json(LockResponse {
            message: "Machine locked for you. Insert coins now.".to_string(),
            lock_expiration: lease.expires_at,
        })),
        AcquireOutcome::Busy => Err(AppError::bad_request("Machine is busy. Please wait.")),
    }
}
