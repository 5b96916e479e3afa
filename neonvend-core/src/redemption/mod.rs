//! Trade accrued credit for an inventory voucher.
//!
//! One redemption is one store transaction: confirm the caller's lease, claim
//! an unused voucher, reset the machine. Either all of it commits or none of
//! it does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::database::ports::LedgerStore;
use crate::database::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{DurationOutOfRange, LeaseHolder, MachineId, Voucher, VoucherDuration};
use crate::error::{ErrorKind, StoreError};

/// Candidates tried before giving up when concurrent claimants keep winning.
pub const DEFAULT_CLAIM_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDenial {
    /// No holder, or the lease has expired.
    NotHeld,
    /// Someone else holds a valid lease.
    HeldByOther,
}

impl fmt::Display for LeaseDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseDenial::NotHeld => f.write_str("not locked or lock expired"),
            LeaseDenial::HeldByOther => f.write_str("locked by another session"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RedemptionError {
    #[error(transparent)]
    InvalidDuration(#[from] DurationOutOfRange),

    #[error("machine {machine_id}: {denial}")]
    NoLease {
        machine_id: MachineId,
        denial: LeaseDenial,
    },

    #[error("no vouchers available for {duration} on machine {machine_id}")]
    NoVoucherAvailable {
        machine_id: MachineId,
        duration: VoucherDuration,
    },

    #[error("machine {0} not found")]
    UnknownMachine(MachineId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RedemptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedemptionError::InvalidDuration(_) => ErrorKind::Validation,
            RedemptionError::NoLease {
                denial: LeaseDenial::HeldByOther,
                ..
            } => ErrorKind::Forbidden,
            RedemptionError::NoLease { .. } => ErrorKind::Conflict,
            RedemptionError::NoVoucherAvailable { .. } | RedemptionError::UnknownMachine(_) => {
                ErrorKind::NotFound
            }
            RedemptionError::Store(err) => err.kind(),
        }
    }
}

/// A committed redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub voucher: Voucher,
    /// Credit the machine held when it was reset.
    pub credit_spent: Decimal,
}

pub struct RedemptionEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    claim_attempts: usize,
}

impl fmt::Debug for RedemptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedemptionEngine")
            .field("store", &self.store)
            .field("store_timeout", &self.store_timeout)
            .field("claim_attempts", &self.claim_attempts)
            .finish_non_exhaustive()
    }
}

impl RedemptionEngine {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_claim_attempts(mut self, attempts: usize) -> Self {
        self.claim_attempts = attempts.max(1);
        self
    }

    /// Redeem the credit on `machine_id` for a voucher of `duration_minutes`.
    ///
    /// `holder` must hold a valid lease. On success the voucher is marked used
    /// and the machine is left unlocked with zero credit.
    pub async fn redeem(
        &self,
        machine_id: &MachineId,
        holder: &LeaseHolder,
        duration_minutes: i64,
    ) -> Result<Redemption, RedemptionError> {
        let duration = VoucherDuration::from_minutes(duration_minutes)?;
        let now = self.clock.now();
        let deadline = self.store_timeout;

        // Dropping `tx` on any early return rolls back.
        let mut tx = bounded(deadline, self.store.begin()).await?;

        let machine = bounded(deadline, tx.lock_machine(machine_id))
            .await?
            .ok_or_else(|| RedemptionError::UnknownMachine(machine_id.clone()))?;

        match machine.active_holder(now) {
            Some(current) if current == holder => {}
            Some(_) => {
                return Err(RedemptionError::NoLease {
                    machine_id: machine_id.clone(),
                    denial: LeaseDenial::HeldByOther,
                });
            }
            None => {
                return Err(RedemptionError::NoLease {
                    machine_id: machine_id.clone(),
                    denial: LeaseDenial::NotHeld,
                });
            }
        }

        let mut lost: Vec<String> = Vec::new();
        let voucher = loop {
            let exhausted = RedemptionError::NoVoucherAvailable {
                machine_id: machine_id.clone(),
                duration,
            };
            if lost.len() >= self.claim_attempts {
                warn!(machine = %machine_id, %duration, attempts = lost.len(), "voucher claims kept losing");
                return Err(exhausted);
            }

            let Some(candidate) =
                bounded(deadline, tx.voucher_candidate(machine_id, duration, &lost)).await?
            else {
                warn!(machine = %machine_id, %duration, "no vouchers available");
                return Err(exhausted);
            };

            if bounded(deadline, tx.claim_voucher(&candidate.code, now)).await? {
                break Voucher {
                    used_at: Some(now),
                    ..candidate
                };
            }
            debug!(machine = %machine_id, %duration, "voucher claimed concurrently, trying next");
            lost.push(candidate.code);
        };

        bounded(deadline, tx.reset_machine(machine_id, now)).await?;
        bounded(deadline, tx.commit()).await?;

        info!(
            machine = %machine_id,
            holder = %holder,
            %duration,
            credit_spent = %machine.accrued_credit,
            "voucher redeemed"
        );

        Ok(Redemption {
            voucher,
            credit_spent: machine.accrued_credit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::memory::InMemoryLedgerStore;
    use crate::database::ports::{AcquireWrite, CreditWrite, LedgerTransaction};
    use crate::domain::MachineState;
    use crate::error::StoreResult;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn vm() -> MachineId {
        MachineId::parse("VM001").unwrap()
    }

    fn minutes(m: i64) -> VoucherDuration {
        VoucherDuration::from_minutes(m).unwrap()
    }

    async fn seeded(codes: &[&str]) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .upsert_machine(&MachineState::new(vm(), Decimal::ONE))
            .await
            .unwrap();
        let vouchers: Vec<_> = codes
            .iter()
            .map(|code| Voucher::unused(*code, vm(), minutes(60)))
            .collect();
        store.add_vouchers(&vouchers).await.unwrap();
        store
    }

    async fn lease_with_credit(store: &InMemoryLedgerStore, clock: &ManualClock, holder: &LeaseHolder) {
        let now = clock.now();
        store
            .try_acquire(&vm(), holder, now, now + chrono::Duration::seconds(60))
            .await
            .unwrap();
        store.credit_if_leased(&vm(), 5, now, now).await.unwrap();
    }

    #[tokio::test]
    async fn redeems_voucher_and_resets_machine() {
        let store = seeded(&["CODE-1", "CODE-2"]).await;
        let clock = ManualClock::starting_now();
        let holder = LeaseHolder::from_digest("me");
        lease_with_credit(&store, &clock, &holder).await;

        let engine = RedemptionEngine::new(store.clone(), Arc::new(clock.clone()));
        let redemption = engine.redeem(&vm(), &holder, 60).await.unwrap();

        assert_eq!(redemption.voucher.code, "CODE-1");
        assert_eq!(redemption.voucher.used_at, Some(clock.now()));
        assert_eq!(redemption.credit_spent, Decimal::from(5));
        assert!(store.voucher("CODE-1").await.unwrap().is_used());

        let machine = store.load_machine(&vm()).await.unwrap().unwrap();
        assert_eq!(machine.accrued_credit, Decimal::ZERO);
        assert!(machine.lease_holder.is_none());
        assert_eq!(machine.lease_expires_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn rejects_out_of_range_duration_before_touching_store() {
        let store = seeded(&["CODE-1"]).await;
        let clock = ManualClock::starting_now();
        let engine = RedemptionEngine::new(store.clone(), Arc::new(clock));
        let holder = LeaseHolder::from_digest("me");

        for bad in [0, 10081, -1] {
            let err = engine.redeem(&vm(), &holder, bad).await.unwrap_err();
            assert!(matches!(err, RedemptionError::InvalidDuration(_)));
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn lease_denials_are_distinguished() {
        let store = seeded(&["CODE-1"]).await;
        let clock = ManualClock::starting_now();
        let engine = RedemptionEngine::new(store.clone(), Arc::new(clock.clone()));
        let owner = LeaseHolder::from_digest("owner");
        let intruder = LeaseHolder::from_digest("intruder");

        let err = engine.redeem(&vm(), &owner, 60).await.unwrap_err();
        assert!(matches!(
            err,
            RedemptionError::NoLease {
                denial: LeaseDenial::NotHeld,
                ..
            }
        ));

        lease_with_credit(&store, &clock, &owner).await;
        let err = engine.redeem(&vm(), &intruder, 60).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        clock.advance(chrono::Duration::seconds(61));
        let err = engine.redeem(&vm(), &owner, 60).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!store.voucher("CODE-1").await.unwrap().is_used());
    }

    #[tokio::test]
    async fn empty_inventory_leaves_lease_and_credit_intact() {
        let store = seeded(&[]).await;
        let clock = ManualClock::starting_now();
        let holder = LeaseHolder::from_digest("me");
        lease_with_credit(&store, &clock, &holder).await;

        let engine = RedemptionEngine::new(store.clone(), Arc::new(clock.clone()));
        let err = engine.redeem(&vm(), &holder, 60).await.unwrap_err();
        assert!(matches!(err, RedemptionError::NoVoucherAvailable { .. }));

        let machine = store.load_machine(&vm()).await.unwrap().unwrap();
        assert_eq!(machine.accrued_credit, Decimal::from(5));
        assert!(machine.is_held_by(&holder, clock.now()));
    }

    #[tokio::test]
    async fn unknown_machine_is_not_found() {
        let store = seeded(&[]).await;
        let engine = RedemptionEngine::new(store, Arc::new(ManualClock::starting_now()));
        let err = engine
            .redeem(
                &MachineId::parse("GHOST").unwrap(),
                &LeaseHolder::from_digest("me"),
                60,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedemptionError::UnknownMachine(_)));
    }

    /// Store whose transactions lose the first `losses` claims, as if another
    /// redemption had committed them first.
    #[derive(Debug)]
    struct ContendedStore {
        inner: Arc<InMemoryLedgerStore>,
        losses: Arc<AtomicUsize>,
    }

    struct ContendedTransaction {
        inner: Box<dyn LedgerTransaction>,
        losses: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LedgerTransaction for ContendedTransaction {
        async fn lock_machine(&mut self, id: &MachineId) -> StoreResult<Option<MachineState>> {
            self.inner.lock_machine(id).await
        }

        async fn voucher_candidate(
            &mut self,
            id: &MachineId,
            duration: VoucherDuration,
            exclude: &[String],
        ) -> StoreResult<Option<Voucher>> {
            self.inner.voucher_candidate(id, duration, exclude).await
        }

        async fn claim_voucher(&mut self, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
            let lose = self
                .losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Ok(false);
            }
            self.inner.claim_voucher(code, now).await
        }

        async fn reset_machine(&mut self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<()> {
            self.inner.reset_machine(id, now).await
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            self.inner.commit().await
        }
    }

    #[async_trait]
    impl LedgerStore for ContendedStore {
        async fn load_machine(&self, id: &MachineId) -> StoreResult<Option<MachineState>> {
            self.inner.load_machine(id).await
        }

        async fn try_acquire(
            &self,
            id: &MachineId,
            holder: &LeaseHolder,
            now: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> StoreResult<AcquireWrite> {
            self.inner.try_acquire(id, holder, now, expires_at).await
        }

        async fn release(&self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.release(id, now).await
        }

        async fn credit_if_leased(
            &self,
            id: &MachineId,
            pulses: u32,
            now: DateTime<Utc>,
            extend_to: DateTime<Utc>,
        ) -> StoreResult<CreditWrite> {
            self.inner.credit_if_leased(id, pulses, now, extend_to).await
        }

        async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
            Ok(Box::new(ContendedTransaction {
                inner: self.inner.begin().await?,
                losses: self.losses.clone(),
            }))
        }

        async fn upsert_machine(&self, machine: &MachineState) -> StoreResult<()> {
            self.inner.upsert_machine(machine).await
        }

        async fn add_vouchers(&self, vouchers: &[Voucher]) -> StoreResult<u64> {
            self.inner.add_vouchers(vouchers).await
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lost_claim_moves_to_next_candidate() {
        let inner = seeded(&["CODE-1", "CODE-2", "CODE-3"]).await;
        let clock = ManualClock::starting_now();
        let holder = LeaseHolder::from_digest("me");
        lease_with_credit(&inner, &clock, &holder).await;

        let store = Arc::new(ContendedStore {
            inner: inner.clone(),
            losses: Arc::new(AtomicUsize::new(2)),
        });
        let engine = RedemptionEngine::new(store, Arc::new(clock));
        let redemption = engine.redeem(&vm(), &holder, 60).await.unwrap();

        assert_eq!(redemption.voucher.code, "CODE-3");
        assert!(!inner.voucher("CODE-1").await.unwrap().is_used());
    }

    #[tokio::test]
    async fn gives_up_after_claim_budget() {
        let inner = seeded(&["CODE-1", "CODE-2", "CODE-3"]).await;
        let clock = ManualClock::starting_now();
        let holder = LeaseHolder::from_digest("me");
        lease_with_credit(&inner, &clock, &holder).await;

        let store = Arc::new(ContendedStore {
            inner: inner.clone(),
            losses: Arc::new(AtomicUsize::new(10)),
        });
        let engine = RedemptionEngine::new(store, Arc::new(clock)).with_claim_attempts(2);
        let err = engine.redeem(&vm(), &holder, 60).await.unwrap_err();

        assert!(matches!(err, RedemptionError::NoVoucherAvailable { .. }));
        let machine = inner.load_machine(&vm()).await.unwrap().unwrap();
        assert_eq!(machine.accrued_credit, Decimal::from(5));
    }
}
