//! Exclusive, time-bounded use of a machine.
//!
//! A machine is either unlocked or locked by one [`LeaseHolder`] until an
//! expiry instant. An expired lock is indistinguishable from an unlocked
//! machine for every predicate here. There is no sweeper; expiry is evaluated
//! against the injected clock at the moment of each store write.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::{Clock, ExpiryOverflow, expiry_after};
use crate::database::ports::{AcquireWrite, LedgerStore};
use crate::database::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{LeaseHolder, LeaseView, MachineId};
use crate::error::{ErrorKind, StoreError};

/// Default lease lifetime from the moment of acquisition.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("machine {0} not found")]
    UnknownMachine(MachineId),

    #[error("lease ttl overflows: {0}")]
    ExpiryOverflow(#[from] ExpiryOverflow),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaseError::UnknownMachine(_) => ErrorKind::NotFound,
            LeaseError::ExpiryOverflow(_) => ErrorKind::Internal,
            LeaseError::Store(err) => err.kind(),
        }
    }
}

/// A successfully acquired or renewed lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub machine_id: MachineId,
    pub expires_at: DateTime<Utc>,
    pub renewed: bool,
    /// Credit carried by the lease after the write. Zero unless the same
    /// holder held the machine last, whether or not that lease had lapsed.
    pub accrued_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(Lease),
    /// Another holder's lease is still valid.
    Busy,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

pub struct LeaseManager {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    lease_ttl: chrono::Duration,
    store_timeout: Duration,
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("store", &self.store)
            .field("lease_ttl", &self.lease_ttl)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lease_ttl: to_chrono(DEFAULT_LEASE_TTL),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = to_chrono(ttl);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Take exclusive use of `machine_id` for `holder`.
    ///
    /// Succeeds when the machine is unlocked, its lease has expired, or
    /// `holder` already holds it. When `holder` was the last holder the
    /// accrued credit is kept, even if that lease had lapsed. A different
    /// holder starts from zero.
    pub async fn acquire(
        &self,
        machine_id: &MachineId,
        holder: &LeaseHolder,
    ) -> Result<AcquireOutcome, LeaseError> {
        let now = self.clock.now();
        let expires_at = expiry_after(now, self.lease_ttl)?;

        let write = bounded(
            self.store_timeout,
            self.store.try_acquire(machine_id, holder, now, expires_at),
        )
        .await?;

        match write {
            AcquireWrite::Acquired {
                expires_at,
                renewed,
                accrued_credit,
            } => {
                info!(
                    machine = %machine_id,
                    holder = %holder,
                    %expires_at,
                    renewed,
                    "lease acquired"
                );
                Ok(AcquireOutcome::Acquired(Lease {
                    machine_id: machine_id.clone(),
                    expires_at,
                    renewed,
                    accrued_credit,
                }))
            }
            AcquireWrite::Busy => {
                debug!(machine = %machine_id, holder = %holder, "lease busy");
                Ok(AcquireOutcome::Busy)
            }
            AcquireWrite::UnknownMachine => Err(LeaseError::UnknownMachine(machine_id.clone())),
        }
    }

    /// Clear the holder and expiry of `machine_id`.
    pub async fn release(&self, machine_id: &MachineId) -> Result<(), LeaseError> {
        let now = self.clock.now();
        let found = bounded(self.store_timeout, self.store.release(machine_id, now)).await?;
        if !found {
            return Err(LeaseError::UnknownMachine(machine_id.clone()));
        }
        info!(machine = %machine_id, "lease released");
        Ok(())
    }

    /// Lease state as visible to `requester`.
    pub async fn status(
        &self,
        machine_id: &MachineId,
        requester: Option<&LeaseHolder>,
    ) -> Result<LeaseView, LeaseError> {
        let machine = bounded(self.store_timeout, self.store.load_machine(machine_id))
            .await?
            .ok_or_else(|| LeaseError::UnknownMachine(machine_id.clone()))?;
        Ok(machine.view_for(requester, self.clock.now()))
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
