pub mod buy;
pub mod hardware;
pub mod health;
pub mod lock;
pub mod session;
pub mod status;

use neonvend_core::{MachineId, SessionRecord, SessionToken};
use tracing::warn;

use crate::{AppError, AppResult, AppState};

/// Resolve `token` to a live session bound to `machine_id`.
///
/// Ids are compared after parsing, so the requested id matches the session
/// under the same normalization the ledger applies.
pub(crate) fn require_session(
    state: &AppState,
    machine_id: &str,
    token: &str,
) -> AppResult<SessionRecord> {
    let token = SessionToken::from_presented(token);
    let Some(session) = state.sessions().validate(&token) else {
        warn!(token = %token, "session validation failed");
        return Err(AppError::unauthorized("Invalid or expired session"));
    };

    let requested = MachineId::parse(machine_id)
        .map_err(|_| AppError::bad_request("Invalid machine ID"))?;
    if session.machine_id != requested {
        warn!(
            session_machine = %session.machine_id,
            %requested,
            "session used for a different machine"
        );
        return Err(AppError::forbidden("Session is for different machine"));
    }
    Ok(session)
}
