use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use tracing::debug;

use neonvend_core::api::routes::SESSION_TOKEN_HEADER;
use neonvend_core::api::{StatusQuery, StatusResponse};
use neonvend_core::{MachineId, SessionToken};

use crate::{AppError, AppResult, AppState};

/// Lease state of a machine as seen by the caller.
///
/// The session token is optional. Without a live session the caller only
/// learns whether the machine is locked.
pub async fn machine_status(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> AppResult<Json<StatusResponse>> {
    let presented = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or(query.session_token)
        .filter(|token| !token.trim().is_empty());

    let session = presented.and_then(|raw| {
        let token = SessionToken::from_presented(raw);
        let session = state.sessions().validate(&token);
        if session.is_none() {
            debug!(token = %token, "status polled with an unknown or expired session");
        }
        session
    });

    let id = MachineId::parse(&machine_id).map_err(|_| AppError::not_found("Machine not found"))?;
    let view = state
        .leases()
        .status(&id, session.as_ref().map(|s| &s.holder))
        .await?;

    if let Some(session) = &session
        && session.machine_id != id
    {
        return Err(AppError::forbidden("Session is for different machine"));
    }

    Ok(Json(view.into()))
}
