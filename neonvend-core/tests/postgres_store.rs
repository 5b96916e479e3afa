#![cfg(feature = "postgres-tests")]

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use neonvend_core::database::ports::{AcquireWrite, CreditWrite, LedgerStore};
use neonvend_core::{
    LeaseHolder, MachineId, MachineState, PostgresLedgerStore, Voucher, VoucherDuration,
};

fn vm() -> MachineId {
    MachineId::parse("VM001").expect("valid id")
}

async fn seeded(pool: PgPool) -> Result<PostgresLedgerStore> {
    let store = PostgresLedgerStore::new(pool);
    store
        .upsert_machine(&MachineState::new(vm(), Decimal::new(125, 2)))
        .await?;
    Ok(store)
}

#[sqlx::test(migrator = "neonvend_core::MIGRATOR")]
async fn acquire_is_conditional_on_holder_and_expiry(pool: PgPool) -> Result<()> {
    let store = seeded(pool).await?;
    let now = Utc::now();
    let a = LeaseHolder::from_digest("a");
    let b = LeaseHolder::from_digest("b");

    let first = store
        .try_acquire(&vm(), &a, now, now + Duration::seconds(60))
        .await?;
    assert!(matches!(first, AcquireWrite::Acquired { renewed: false, .. }));

    let busy = store
        .try_acquire(&vm(), &b, now, now + Duration::seconds(60))
        .await?;
    assert_eq!(busy, AcquireWrite::Busy);

    let credited = store
        .credit_if_leased(&vm(), 2, now, now + Duration::seconds(60))
        .await?;
    assert!(matches!(credited, CreditWrite::Credited { .. }));

    let renewed = store
        .try_acquire(&vm(), &a, now, now + Duration::seconds(90))
        .await?;
    match renewed {
        AcquireWrite::Acquired {
            renewed,
            accrued_credit,
            ..
        } => {
            assert!(renewed);
            assert_eq!(accrued_credit, Decimal::new(250, 2));
        }
        other => panic!("expected renewal, got {other:?}"),
    }

    let lapsed = now + Duration::seconds(120);
    let relocked = store
        .try_acquire(&vm(), &a, lapsed, lapsed + Duration::seconds(60))
        .await?;
    match relocked {
        AcquireWrite::Acquired {
            renewed,
            accrued_credit,
            ..
        } => {
            assert!(renewed);
            assert_eq!(accrued_credit, Decimal::new(250, 2));
        }
        other => panic!("expected same-holder relock, got {other:?}"),
    }

    let later = lapsed + Duration::seconds(61);
    let takeover = store
        .try_acquire(&vm(), &b, later, later + Duration::seconds(60))
        .await?;
    match takeover {
        AcquireWrite::Acquired {
            renewed,
            accrued_credit,
            ..
        } => {
            assert!(!renewed);
            assert_eq!(accrued_credit, Decimal::ZERO);
        }
        other => panic!("expected takeover, got {other:?}"),
    }

    let ghost = MachineId::parse("GHOST")?;
    assert_eq!(
        store
            .try_acquire(&ghost, &a, now, now + Duration::seconds(60))
            .await?,
        AcquireWrite::UnknownMachine
    );
    Ok(())
}

#[sqlx::test(migrator = "neonvend_core::MIGRATOR")]
async fn credit_requires_a_valid_lease(pool: PgPool) -> Result<()> {
    let store = seeded(pool).await?;
    let now = Utc::now();

    assert_eq!(
        store
            .credit_if_leased(&vm(), 1, now, now + Duration::seconds(60))
            .await?,
        CreditWrite::NoLease
    );

    store
        .try_acquire(
            &vm(),
            &LeaseHolder::from_digest("a"),
            now,
            now + Duration::seconds(60),
        )
        .await?;
    let write = store
        .credit_if_leased(&vm(), 4, now, now + Duration::seconds(60))
        .await?;
    match write {
        CreditWrite::Credited {
            credit_added,
            accrued_credit,
            ..
        } => {
            assert_eq!(credit_added, Decimal::new(500, 2));
            assert_eq!(accrued_credit, Decimal::new(500, 2));
        }
        other => panic!("expected credit, got {other:?}"),
    }
    Ok(())
}

#[sqlx::test(migrator = "neonvend_core::MIGRATOR")]
async fn dropped_transaction_rolls_back_claim(pool: PgPool) -> Result<()> {
    let store = seeded(pool).await?;
    let sixty = VoucherDuration::from_minutes(60)?;
    store
        .add_vouchers(&[
            Voucher::unused("PG-1", vm(), sixty),
            Voucher::unused("PG-2", vm(), sixty),
        ])
        .await?;

    {
        let mut tx = store.begin().await?;
        assert!(tx.lock_machine(&vm()).await?.is_some());
        let candidate = tx
            .voucher_candidate(&vm(), sixty, &[])
            .await?
            .expect("candidate");
        assert!(tx.claim_voucher(&candidate.code, Utc::now()).await?);
    }

    let mut tx = store.begin().await?;
    let skipped = vec!["PG-1".to_string()];
    let candidate = tx
        .voucher_candidate(&vm(), sixty, &skipped)
        .await?
        .expect("second candidate");
    assert_eq!(candidate.code, "PG-2");
    assert!(tx.claim_voucher("PG-1", Utc::now()).await?);
    assert!(!tx.claim_voucher("PG-1", Utc::now()).await?);
    tx.reset_machine(&vm(), Utc::now()).await?;
    tx.commit().await?;

    let machine = store.load_machine(&vm()).await?.expect("machine");
    assert_eq!(machine.accrued_credit, Decimal::ZERO);
    assert!(machine.lease_holder.is_none());
    Ok(())
}

#[sqlx::test(migrator = "neonvend_core::MIGRATOR")]
async fn upsert_preserves_lease_state(pool: PgPool) -> Result<()> {
    let store = seeded(pool).await?;
    let now = Utc::now();
    let holder = LeaseHolder::from_digest("a");
    store
        .try_acquire(&vm(), &holder, now, now + Duration::seconds(60))
        .await?;

    store
        .upsert_machine(&MachineState::new(vm(), Decimal::new(50, 2)).with_secret_key("k"))
        .await?;

    let machine = store.load_machine(&vm()).await?.expect("machine");
    assert_eq!(machine.pulse_rate, Decimal::new(50, 2));
    assert_eq!(machine.secret_key.as_deref(), Some("k"));
    assert_eq!(machine.lease_holder, Some(holder));
    store.ping().await?;
    Ok(())
}
