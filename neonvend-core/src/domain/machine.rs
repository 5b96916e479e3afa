use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_MACHINE_ID_LEN: usize = 64;

/// Identifier of a physical machine, e.g. `VM001`.
///
/// Restricted to ASCII letters, digits, `-`, `_` and `.` so it can be embedded
/// verbatim in the colon separated string that hardware signs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MachineId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMachineId {
    #[error("machine id must not be empty")]
    Empty,
    #[error("machine id exceeds {MAX_MACHINE_ID_LEN} characters")]
    TooLong,
    #[error("machine id contains unsupported character {0:?}")]
    BadCharacter(char),
}

impl MachineId {
    pub fn parse(raw: &str) -> Result<Self, InvalidMachineId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidMachineId::Empty);
        }
        if trimmed.len() > MAX_MACHINE_ID_LEN {
            return Err(InvalidMachineId::TooLong);
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(InvalidMachineId::BadCharacter(bad));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MachineId {
    type Error = InvalidMachineId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MachineId::parse(&value)
    }
}

impl From<MachineId> for String {
    fn from(value: MachineId) -> Self {
        value.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of whoever holds a lease.
///
/// This is the keyed digest of a session token, never the token itself, so
/// the value persisted on a machine row cannot be replayed as a bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LeaseHolder(String);

impl LeaseHolder {
    /// Wrap a digest previously produced by the session directory (or read
    /// back from the store).
    pub fn from_digest(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LeaseHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseHolder({self})")
    }
}

impl fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.0.chars().take(8).collect();
        write!(f, "{preview}...")
    }
}

/// Persisted ledger row for one machine.
#[derive(Clone)]
pub struct MachineState {
    pub id: MachineId,
    /// Per-machine hardware key, consulted only in per-machine key scope.
    pub secret_key: Option<String>,
    pub lease_holder: Option<LeaseHolder>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Never negative.
    pub accrued_credit: Decimal,
    /// Currency credited per coin pulse.
    pub pulse_rate: Decimal,
}

impl MachineState {
    /// Unleased machine with no credit.
    pub fn new(id: MachineId, pulse_rate: Decimal) -> Self {
        Self {
            id,
            secret_key: None,
            lease_holder: None,
            lease_expires_at: None,
            accrued_credit: Decimal::ZERO,
            pulse_rate,
        }
    }

    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Holder whose lease is still valid at `now`.
    ///
    /// A holder without an expiry, or whose expiry is not strictly in the
    /// future, counts as no holder at all.
    pub fn active_holder(&self, now: DateTime<Utc>) -> Option<&LeaseHolder> {
        match (&self.lease_holder, self.lease_expires_at) {
            (Some(holder), Some(expires_at)) if expires_at > now => Some(holder),
            _ => None,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.active_holder(now).is_some()
    }

    pub fn is_held_by(&self, holder: &LeaseHolder, now: DateTime<Utc>) -> bool {
        self.active_holder(now) == Some(holder)
    }

    /// Project the row for a requester. Credit and expiry are only revealed
    /// to the current valid holder.
    pub fn view_for(&self, requester: Option<&LeaseHolder>, now: DateTime<Utc>) -> LeaseView {
        let active = self.active_holder(now);
        let locked_by_me = matches!((active, requester), (Some(a), Some(r)) if a == r);

        if locked_by_me {
            LeaseView {
                is_locked: true,
                locked_by_me: true,
                current_credit: self.accrued_credit,
                lock_expiration: self.lease_expires_at,
            }
        } else {
            LeaseView {
                is_locked: active.is_some(),
                locked_by_me: false,
                current_credit: Decimal::ZERO,
                lock_expiration: None,
            }
        }
    }
}

impl fmt::Debug for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineState")
            .field("id", &self.id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("lease_holder", &self.lease_holder)
            .field("lease_expires_at", &self.lease_expires_at)
            .field("accrued_credit", &self.accrued_credit)
            .field("pulse_rate", &self.pulse_rate)
            .finish()
    }
}

/// What a requester may see about a machine's lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseView {
    pub is_locked: bool,
    pub locked_by_me: bool,
    pub current_credit: Decimal,
    pub lock_expiration: Option<DateTime<Utc>>,
}
