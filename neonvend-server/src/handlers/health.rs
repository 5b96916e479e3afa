use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use neonvend_core::database::bounded;

use crate::AppState;

pub async fn ping() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "neonvend ledger is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Probes the ledger store. Responds 503 when the store does not answer
/// within the configured deadline.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let deadline = state.config().ledger.store_timeout;
    let store = match bounded(deadline, state.store.ping()).await {
        Ok(()) => json!({ "status": "healthy", "backend": state.config().store.to_string() }),
        Err(err) => json!({
            "status": "unhealthy",
            "backend": state.config().store.to_string(),
            "error": err.to_string(),
        }),
    };
    let healthy = store["status"] == "healthy";

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "store": store,
            "sessions": { "active": state.sessions().len() },
        },
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
