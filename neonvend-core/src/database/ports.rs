use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{LeaseHolder, MachineId, MachineState, Voucher, VoucherDuration};
use crate::error::StoreResult;

/// Result of the conditional lease write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireWrite {
    Acquired {
        expires_at: DateTime<Utc>,
        /// Same holder re-acquired a lease that was still valid.
        renewed: bool,
        accrued_credit: Decimal,
    },
    /// Another holder's lease is still valid. Nothing was written.
    Busy,
    UnknownMachine,
}

/// Result of the conditional credit write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditWrite {
    Credited {
        credit_added: Decimal,
        accrued_credit: Decimal,
        lease_expires_at: DateTime<Utc>,
    },
    /// No valid lease holder. Nothing was written.
    NoLease,
    UnknownMachine,
}

/// Storage port for machine ledger rows and voucher inventory.
///
/// Every write that depends on current state is a single conditional
/// operation on the store side; callers never read-then-write.
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Fetch one machine row.
    async fn load_machine(&self, id: &MachineId) -> StoreResult<Option<MachineState>>;

    /// Take or renew the lease iff the machine is unleased, its lease expired
    /// at `now`, or `holder` already holds it. Credit is kept only when the
    /// same holder renews a still valid lease.
    async fn try_acquire(
        &self,
        id: &MachineId,
        holder: &LeaseHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<AcquireWrite>;

    /// Clear holder and expiry. Returns false for an unknown machine.
    async fn release(&self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Add `pulses * pulse_rate` to the accrued credit and push the lease
    /// expiry out to at least `extend_to`, iff a lease is valid at `now`.
    async fn credit_if_leased(
        &self,
        id: &MachineId,
        pulses: u32,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> StoreResult<CreditWrite>;

    /// Open a transaction for redemption. Dropping it without
    /// [`LedgerTransaction::commit`] discards every write made through it.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>>;

    /// Insert a machine or update its key and pulse rate. Lease state and
    /// credit of an existing row are left untouched.
    async fn upsert_machine(&self, machine: &MachineState) -> StoreResult<()>;

    /// Add vouchers to inventory, skipping codes that already exist.
    /// Returns the number of rows inserted.
    async fn add_vouchers(&self, vouchers: &[Voucher]) -> StoreResult<u64>;

    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Unit of work used by the redemption engine.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Read a machine row and hold it against concurrent writers until the
    /// transaction ends.
    async fn lock_machine(&mut self, id: &MachineId) -> StoreResult<Option<MachineState>>;

    /// Next unused voucher for the machine and duration, skipping `exclude`.
    async fn voucher_candidate(
        &mut self,
        id: &MachineId,
        duration: VoucherDuration,
        exclude: &[String],
    ) -> StoreResult<Option<Voucher>>;

    /// Mark a voucher used iff it is still unused. False means a concurrent
    /// claimant won.
    async fn claim_voucher(&mut self, code: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Zero the credit, clear the holder and set expiry to `now`.
    async fn reset_machine(&mut self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
