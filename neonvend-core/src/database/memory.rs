use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database::ports::{AcquireWrite, CreditWrite, LedgerStore, LedgerTransaction};
use crate::domain::{LeaseHolder, MachineId, MachineState, Voucher, VoucherDuration};
use crate::error::{StoreError, StoreResult};

// Column scales of the ledger table; NUMERIC rounds half away from zero.
const CREDIT_SCALE: u32 = 2;
const RATE_SCALE: u32 = 4;

fn to_scale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    machines: HashMap<MachineId, MachineState>,
    /// Insertion order doubles as candidate order.
    vouchers: Vec<Voucher>,
}

impl Ledger {
    fn voucher_mut(&mut self, code: &str) -> Option<&mut Voucher> {
        self.vouchers.iter_mut().find(|v| v.code == code)
    }
}

/// Process-local ledger for development and tests.
///
/// A single async mutex guards the whole ledger, so every port call is
/// atomic. A transaction holds that mutex until it commits or is dropped and
/// works on a staged copy, which gives all-or-nothing redemption.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<Mutex<Ledger>>,
}

impl fmt::Debug for InMemoryLedgerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (machines, vouchers) = match self.inner.try_lock() {
            Ok(guard) => (Some(guard.machines.len()), Some(guard.vouchers.len())),
            Err(_) => (None, None),
        };
        f.debug_struct("InMemoryLedgerStore")
            .field("machines", &machines)
            .field("vouchers", &vouchers)
            .finish()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one voucher, mainly for assertions.
    pub async fn voucher(&self, code: &str) -> Option<Voucher> {
        let guard = self.inner.lock().await;
        guard.vouchers.iter().find(|v| v.code == code).cloned()
    }

    /// Count of unused vouchers for a machine.
    pub async fn unused_vouchers(&self, id: &MachineId) -> usize {
        let guard = self.inner.lock().await;
        guard
            .vouchers
            .iter()
            .filter(|v| &v.machine_id == id && !v.is_used())
            .count()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_machine(&self, id: &MachineId) -> StoreResult<Option<MachineState>> {
        let guard = self.inner.lock().await;
        Ok(guard.machines.get(id).cloned())
    }

    async fn try_acquire(
        &self,
        id: &MachineId,
        holder: &LeaseHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<AcquireWrite> {
        let mut guard = self.inner.lock().await;
        let Some(machine) = guard.machines.get_mut(id) else {
            return Ok(AcquireWrite::UnknownMachine);
        };

        if machine
            .active_holder(now)
            .is_some_and(|current| current != holder)
        {
            return Ok(AcquireWrite::Busy);
        }
        // Credit follows the holder, even across a lapsed lease.
        let renewed = machine.lease_holder.as_ref() == Some(holder);

        if !renewed {
            machine.accrued_credit = Decimal::ZERO;
        }
        machine.lease_holder = Some(holder.clone());
        machine.lease_expires_at = Some(expires_at);

        Ok(AcquireWrite::Acquired {
            expires_at,
            renewed,
            accrued_credit: machine.accrued_credit,
        })
    }

    async fn release(&self, id: &MachineId, _now: DateTime<Utc>) -> StoreResult<bool> {
        let mut guard = self.inner.lock().await;
        match guard.machines.get_mut(id) {
            Some(machine) => {
                machine.lease_holder = None;
                machine.lease_expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn credit_if_leased(
        &self,
        id: &MachineId,
        pulses: u32,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> StoreResult<CreditWrite> {
        let mut guard = self.inner.lock().await;
        let Some(machine) = guard.machines.get_mut(id) else {
            return Ok(CreditWrite::UnknownMachine);
        };
        if !machine.is_locked(now) {
            return Ok(CreditWrite::NoLease);
        }

        let credit_added = Decimal::from(pulses)
            .checked_mul(machine.pulse_rate)
            .ok_or_else(|| StoreError::Query("credit overflow".into()))?;
        let accrued_credit = machine
            .accrued_credit
            .checked_add(credit_added)
            .map(|sum| to_scale(sum, CREDIT_SCALE))
            .ok_or_else(|| StoreError::Query("credit overflow".into()))?;
        let lease_expires_at = machine
            .lease_expires_at
            .map_or(extend_to, |current| current.max(extend_to));

        machine.accrued_credit = accrued_credit;
        machine.lease_expires_at = Some(lease_expires_at);

        Ok(CreditWrite::Credited {
            credit_added,
            accrued_credit,
            lease_expires_at,
        })
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }

    async fn upsert_machine(&self, machine: &MachineState) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        match guard.machines.get_mut(&machine.id) {
            Some(existing) => {
                existing.secret_key = machine.secret_key.clone();
                existing.pulse_rate = to_scale(machine.pulse_rate, RATE_SCALE);
            }
            None => {
                let mut fresh = machine.clone();
                fresh.pulse_rate = to_scale(fresh.pulse_rate, RATE_SCALE);
                fresh.accrued_credit = to_scale(fresh.accrued_credit, CREDIT_SCALE);
                guard.machines.insert(machine.id.clone(), fresh);
            }
        }
        Ok(())
    }

    async fn add_vouchers(&self, vouchers: &[Voucher]) -> StoreResult<u64> {
        let mut guard = self.inner.lock().await;
        let mut inserted = 0;
        for voucher in vouchers {
            if !guard.machines.contains_key(&voucher.machine_id) {
                return Err(StoreError::Query(format!(
                    "voucher {} references unknown machine {}",
                    voucher.code, voucher.machine_id
                )));
            }
            if guard.vouchers.iter().any(|v| v.code == voucher.code) {
                continue;
            }
            guard.vouchers.push(voucher.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Ledger>,
    staged: Ledger,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_machine(&mut self, id: &MachineId) -> StoreResult<Option<MachineState>> {
        Ok(self.staged.machines.get(id).cloned())
    }

    async fn voucher_candidate(
        &mut self,
        id: &MachineId,
        duration: VoucherDuration,
        exclude: &[String],
    ) -> StoreResult<Option<Voucher>> {
        Ok(self
            .staged
            .vouchers
            .iter()
            .find(|v| {
                &v.machine_id == id
                    && v.duration == duration
                    && !v.is_used()
                    && !exclude.contains(&v.code)
            })
            .cloned())
    }

    async fn claim_voucher(&mut self, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        match self.staged.voucher_mut(code) {
            Some(voucher) if !voucher.is_used() => {
                voucher.used_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_machine(&mut self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<()> {
        let machine = self
            .staged
            .machines
            .get_mut(id)
            .ok_or_else(|| StoreError::Corrupt(format!("machine {id} vanished mid-transaction")))?;
        machine.accrued_credit = Decimal::ZERO;
        machine.lease_holder = None;
        machine.lease_expires_at = Some(now);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
