use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::replay::{ReplayPolicy, TimestampKind};
use super::signature::{PulseKey, canonical_message};
use super::{AuthFailure, CreditError};
use crate::clock::{Clock, expiry_after};
use crate::database::ports::{CreditWrite, LedgerStore};
use crate::database::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::MachineId;
use crate::lease::{DEFAULT_LEASE_TTL, to_chrono};

/// Which secret authenticates coin pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// One secret for the whole deployment.
    #[default]
    Deployment,
    /// Each machine row carries its own secret.
    Machine,
}

impl FromStr for KeyScope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "deployment" | "global" => Ok(KeyScope::Deployment),
            "machine" | "per_machine" | "per-machine" => Ok(KeyScope::Machine),
            other => Err(format!(
                "unknown key scope {other:?} (expected deployment or machine)"
            )),
        }
    }
}

/// Resolved signing keys for a deployment.
#[derive(Debug, Clone)]
pub enum PulseKeys {
    Deployment(PulseKey),
    PerMachine,
}

impl PulseKeys {
    pub fn scope(&self) -> KeyScope {
        match self {
            PulseKeys::Deployment(_) => KeyScope::Deployment,
            PulseKeys::PerMachine => KeyScope::Machine,
        }
    }
}

/// Coin-pulse message as sent by hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinPulse {
    pub machine_id: String,
    pub pulse_count: u32,
    /// Exactly as transmitted; the signature covers this text.
    pub timestamp: String,
    /// Hex HMAC-SHA-256 of [`canonical_message`].
    pub signature: String,
}

/// Accepted pulse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditReceipt {
    pub machine_id: MachineId,
    pub credit_added: Decimal,
    pub accrued_credit: Decimal,
    pub lease_expires_at: DateTime<Utc>,
    pub timestamp_kind: TimestampKind,
}

/// Authenticates coin pulses and credits the leased machine.
///
/// Duplicate messages inside the replay window are credited again; there is
/// no message-level deduplication.
pub struct CreditIngestor {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    keys: PulseKeys,
    replay: ReplayPolicy,
    renewal: chrono::Duration,
    store_timeout: Duration,
}

impl fmt::Debug for CreditIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditIngestor")
            .field("key_scope", &self.keys.scope())
            .field("replay", &self.replay)
            .field("renewal", &self.renewal)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl CreditIngestor {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, keys: PulseKeys) -> Self {
        Self {
            store,
            clock,
            keys,
            replay: ReplayPolicy::default(),
            renewal: to_chrono(DEFAULT_LEASE_TTL),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_replay_policy(mut self, replay: ReplayPolicy) -> Self {
        self.replay = replay;
        self
    }

    /// How far past now an accepted pulse pushes the lease expiry.
    pub fn with_renewal_window(mut self, renewal: Duration) -> Self {
        self.renewal = to_chrono(renewal);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn replay_policy(&self) -> &ReplayPolicy {
        &self.replay
    }

    /// Authenticate `pulse` and credit its machine.
    ///
    /// The signature is checked before the timestamp, so a forged message is
    /// rejected whatever its timestamp says. Nothing is written unless the
    /// machine holds a valid lease at the moment of the write.
    pub async fn ingest(&self, pulse: &CoinPulse) -> Result<CreditReceipt, CreditError> {
        // The signed id and the credited id must be the same text, so a
        // padded or otherwise non-canonical id is never accepted.
        let machine_id = MachineId::parse(&pulse.machine_id)
            .ok()
            .filter(|id| id.as_str() == pulse.machine_id)
            .ok_or_else(|| self.reject(&pulse.machine_id, AuthFailure::UnknownMachine))?;

        let message = canonical_message(machine_id.as_str(), pulse.pulse_count, &pulse.timestamp);
        let verified = match &self.keys {
            PulseKeys::Deployment(key) => key.verify(&message, &pulse.signature),
            PulseKeys::PerMachine => self
                .machine_key(&machine_id)
                .await?
                .verify(&message, &pulse.signature),
        };
        verified.map_err(|failure| self.reject(&pulse.machine_id, failure))?;

        let now = self.clock.now();
        let timestamp_kind = self
            .replay
            .check(&pulse.timestamp, now)
            .map_err(|failure| self.reject(&pulse.machine_id, failure))?;

        if pulse.pulse_count == 0 {
            return Err(CreditError::InvalidPulseCount);
        }

        let extend_to = expiry_after(now, self.renewal)?;
        let write = bounded(
            self.store_timeout,
            self.store.credit_if_leased(&machine_id, pulse.pulse_count, now, extend_to),
        )
        .await?;

        match write {
            CreditWrite::Credited {
                credit_added,
                accrued_credit,
                lease_expires_at,
            } => {
                info!(
                    machine = %machine_id,
                    pulses = pulse.pulse_count,
                    %credit_added,
                    %accrued_credit,
                    ?timestamp_kind,
                    "coin pulse credited"
                );
                Ok(CreditReceipt {
                    machine_id,
                    credit_added,
                    accrued_credit,
                    lease_expires_at,
                    timestamp_kind,
                })
            }
            CreditWrite::NoLease => {
                warn!(
                    machine = %machine_id,
                    pulses = pulse.pulse_count,
                    "coin pulse for machine without a valid lease"
                );
                Err(CreditError::NoLease(machine_id))
            }
            CreditWrite::UnknownMachine => {
                Err(self.reject(&pulse.machine_id, AuthFailure::UnknownMachine))
            }
        }
    }

    async fn machine_key(&self, machine_id: &MachineId) -> Result<PulseKey, CreditError> {
        let machine = bounded(self.store_timeout, self.store.load_machine(machine_id))
            .await?
            .ok_or_else(|| self.reject(machine_id.as_str(), AuthFailure::UnknownMachine))?;

        machine
            .secret_key
            .as_deref()
            .and_then(|secret| PulseKey::new(secret).ok())
            .ok_or_else(|| self.reject(machine_id.as_str(), AuthFailure::MissingMachineKey))
    }

    fn reject(&self, machine_id: &str, failure: AuthFailure) -> CreditError {
        warn!(machine = %machine_id, reason = %failure, "coin pulse rejected");
        CreditError::AuthFailed(failure)
    }
}
