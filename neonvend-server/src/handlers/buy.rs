use axum::{Json, extract::State};

use neonvend_core::api::{BuyRequest, BuyResponse};

use super::require_session;
use crate::{AppResult, AppState};

/// Trade the accrued credit for a voucher and release the machine.
pub async fn buy_voucher(
    State(state): State<AppState>,
    Json(request): Json<BuyRequest>,
) -> AppResult<Json<BuyResponse>> {
    let session = require_session(&state, &request.machine_id, &request.session_id)?;

    let redemption = state
        .redemptions()
        .redeem(&session.machine_id, &session.holder, request.duration_minutes)
        .await?;

    Ok(Json(BuyResponse {
        code: redemption.voucher.code,
        duration_minutes: redemption.voucher.duration.minutes(),
    }))
}
