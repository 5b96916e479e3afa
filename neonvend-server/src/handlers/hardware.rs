use axum::{Json, extract::State};

use neonvend_core::CoinPulse;
use neonvend_core::api::{CoinRequest, CoinResponse};

use crate::{AppResult, AppState};

/// Signed coin pulse from machine hardware.
pub async fn receive_coin(
    State(state): State<AppState>,
    Json(request): Json<CoinRequest>,
) -> AppResult<Json<CoinResponse>> {
    let pulse = CoinPulse::from(request);
    let receipt = state.credits().ingest(&pulse).await?;

    Ok(Json(CoinResponse {
        success: true,
        credit_added: receipt.credit_added,
    }))
}
