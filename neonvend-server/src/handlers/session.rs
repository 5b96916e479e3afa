use axum::{Json, extract::State};

use neonvend_core::api::{CreateSessionRequest, CreateSessionResponse};

use crate::{AppResult, AppState};

/// Issue a bearer token bound to the requested machine.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> AppResult<Json<CreateSessionResponse>> {
    let (token, _) = state.sessions().create_session(&request.machine_id)?;
    Ok(Json(CreateSessionResponse {
        session_token: token.as_str().to_owned(),
    }))
}
