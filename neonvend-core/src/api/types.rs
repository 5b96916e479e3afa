use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::credit::CoinPulse;
use crate::domain::LeaseView;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub machine_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub session_token: Option<String>,
}

/// Lease state as seen by the requesting session. Credit is a decimal
/// string so no precision is lost in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_locked: bool,
    pub locked_by_me: bool,
    pub current_credit: Decimal,
    pub lock_expiration: Option<DateTime<Utc>>,
}

impl From<LeaseView> for StatusResponse {
    fn from(view: LeaseView) -> Self {
        Self {
            is_locked: view.is_locked,
            locked_by_me: view.locked_by_me,
            current_credit: view.current_credit,
            lock_expiration: view.lock_expiration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub machine_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub message: String,
    pub lock_expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub machine_id: String,
    pub session_id: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyResponse {
    pub code: String,
    pub duration_minutes: u32,
}

/// Coin pulse as posted by hardware. `timestamp` may arrive as a JSON
/// string or integer; either way the decimal text is kept verbatim because
/// the signature covers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinRequest {
    pub machine_id: String,
    pub pulse_count: u32,
    #[serde(deserialize_with = "timestamp_text")]
    pub timestamp: String,
    pub signature: String,
}

impl From<CoinRequest> for CoinPulse {
    fn from(request: CoinRequest) -> Self {
        CoinPulse {
            machine_id: request.machine_id,
            pulse_count: request.pulse_count,
            timestamp: request.timestamp,
            signature: request.signature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinResponse {
    pub success: bool,
    pub credit_added: Decimal,
}

fn timestamp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}
