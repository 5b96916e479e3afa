use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::database::ports::{AcquireWrite, CreditWrite, LedgerStore, LedgerTransaction};
use crate::domain::{LeaseHolder, MachineId, MachineState, Voucher, VoucherDuration};
use crate::error::{StoreError, StoreResult};

const MACHINE_COLUMNS: &str =
    "machine_id, secret_key, lease_holder, lease_expires_at, accrued_credit, pulse_rate";

/// Pool sizing and server-side timeouts for [`PostgresLedgerStore::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Applied as `statement_timeout` on every connection.
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 16,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// PostgreSQL-backed ledger.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresLedgerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresLedgerStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool for `database_url`.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> StoreResult<Self> {
        let statement_timeout_ms = settings.statement_timeout.as_millis().to_string();
        let options: PgConnectOptions = database_url
            .parse::<PgConnectOptions>()
            .map_err(|e| StoreError::sqlx("Invalid database URL", e))?
            .options([("statement_timeout", statement_timeout_ms.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .max_lifetime(Duration::from_secs(1800))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::sqlx("Database connection failed", e))?;

        info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Database pool initialized"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        crate::MIGRATOR
            .run(self.pool())
            .await
            .map_err(|e| StoreError::Query(format!("Failed to run migrations: {e}")))
    }

    async fn machine_exists(&self, id: &MachineId) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM vending_machines WHERE machine_id = $1)",
        )
        .bind(id.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to check machine existence", e))
    }
}

fn map_machine(row: &PgRow) -> StoreResult<MachineState> {
    let raw_id: String = row
        .try_get("machine_id")
        .map_err(|e| StoreError::sqlx("Failed to read machine_id", e))?;
    let id = MachineId::parse(&raw_id)
        .map_err(|e| StoreError::Corrupt(format!("stored machine id {raw_id:?}: {e}")))?;
    let secret_key: Option<String> = row
        .try_get("secret_key")
        .map_err(|e| StoreError::sqlx("Failed to read secret_key", e))?;
    let lease_holder: Option<String> = row
        .try_get("lease_holder")
        .map_err(|e| StoreError::sqlx("Failed to read lease_holder", e))?;
    let lease_expires_at: Option<DateTime<Utc>> = row
        .try_get("lease_expires_at")
        .map_err(|e| StoreError::sqlx("Failed to read lease_expires_at", e))?;
    let accrued_credit: Decimal = row
        .try_get("accrued_credit")
        .map_err(|e| StoreError::sqlx("Failed to read accrued_credit", e))?;
    let pulse_rate: Decimal = row
        .try_get("pulse_rate")
        .map_err(|e| StoreError::sqlx("Failed to read pulse_rate", e))?;

    Ok(MachineState {
        id,
        secret_key,
        lease_holder: lease_holder.map(LeaseHolder::from_digest),
        lease_expires_at,
        accrued_credit,
        pulse_rate,
    })
}

fn map_voucher(row: &PgRow) -> StoreResult<Voucher> {
    let code: String = row
        .try_get("code")
        .map_err(|e| StoreError::sqlx("Failed to read voucher code", e))?;
    let raw_machine: String = row
        .try_get("machine_id")
        .map_err(|e| StoreError::sqlx("Failed to read voucher machine_id", e))?;
    let minutes: i32 = row
        .try_get("duration_minutes")
        .map_err(|e| StoreError::sqlx("Failed to read duration_minutes", e))?;
    let used_at: Option<DateTime<Utc>> = row
        .try_get("used_at")
        .map_err(|e| StoreError::sqlx("Failed to read used_at", e))?;

    let machine_id = MachineId::parse(&raw_machine)
        .map_err(|e| StoreError::Corrupt(format!("voucher {code} machine id: {e}")))?;
    let duration = VoucherDuration::from_minutes(i64::from(minutes))
        .map_err(|e| StoreError::Corrupt(format!("voucher {code}: {e}")))?;

    Ok(Voucher {
        code,
        machine_id,
        duration,
        used_at,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn load_machine(&self, id: &MachineId) -> StoreResult<Option<MachineState>> {
        let row = sqlx::query(&format!(
            "SELECT {MACHINE_COLUMNS} FROM vending_machines WHERE machine_id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to load machine", e))?;

        row.as_ref().map(map_machine).transpose()
    }

    async fn try_acquire(
        &self,
        id: &MachineId,
        holder: &LeaseHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<AcquireWrite> {
        // The CTE row lock re-reads the latest committed row, so the
        // predicate and the write see the same state.
        let row = sqlx::query(
            r#"
            WITH prior AS (
                SELECT machine_id, lease_holder, lease_expires_at
                FROM vending_machines
                WHERE machine_id = $1
                FOR UPDATE
            )
            UPDATE vending_machines AS m
            SET lease_holder = $2,
                lease_expires_at = $4,
                accrued_credit = CASE
                    WHEN prior.lease_holder = $2 THEN m.accrued_credit
                    ELSE 0
                END,
                updated_at = $3
            FROM prior
            WHERE m.machine_id = prior.machine_id
              AND (
                    prior.lease_holder IS NULL
                 OR prior.lease_expires_at IS NULL
                 OR prior.lease_expires_at <= $3
                 OR prior.lease_holder = $2
              )
            RETURNING
                m.lease_expires_at,
                m.accrued_credit,
                COALESCE(prior.lease_holder = $2, FALSE) AS renewed
            "#,
        )
        .bind(id.as_str())
        .bind(holder.as_str())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to acquire lease", e))?;

        match row {
            Some(row) => {
                let expires_at: DateTime<Utc> = row
                    .try_get("lease_expires_at")
                    .map_err(|e| StoreError::sqlx("Failed to read lease_expires_at", e))?;
                let accrued_credit: Decimal = row
                    .try_get("accrued_credit")
                    .map_err(|e| StoreError::sqlx("Failed to read accrued_credit", e))?;
                let renewed: bool = row
                    .try_get("renewed")
                    .map_err(|e| StoreError::sqlx("Failed to read renewed flag", e))?;
                Ok(AcquireWrite::Acquired {
                    expires_at,
                    renewed,
                    accrued_credit,
                })
            }
            None if self.machine_exists(id).await? => Ok(AcquireWrite::Busy),
            None => Ok(AcquireWrite::UnknownMachine),
        }
    }

    async fn release(&self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vending_machines
            SET lease_holder = NULL,
                lease_expires_at = NULL,
                updated_at = $2
            WHERE machine_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to release lease", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn credit_if_leased(
        &self,
        id: &MachineId,
        pulses: u32,
        now: DateTime<Utc>,
        extend_to: DateTime<Utc>,
    ) -> StoreResult<CreditWrite> {
        let row = sqlx::query(
            r#"
            UPDATE vending_machines
            SET accrued_credit = accrued_credit + $2 * pulse_rate,
                lease_expires_at = GREATEST(lease_expires_at, $4),
                updated_at = $3
            WHERE machine_id = $1
              AND lease_holder IS NOT NULL
              AND lease_expires_at > $3
            RETURNING $2 * pulse_rate AS credit_added, accrued_credit, lease_expires_at
            "#,
        )
        .bind(id.as_str())
        .bind(Decimal::from(pulses))
        .bind(now)
        .bind(extend_to)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to credit machine", e))?;

        match row {
            Some(row) => {
                let credit_added: Decimal = row
                    .try_get("credit_added")
                    .map_err(|e| StoreError::sqlx("Failed to read credit_added", e))?;
                let accrued_credit: Decimal = row
                    .try_get("accrued_credit")
                    .map_err(|e| StoreError::sqlx("Failed to read accrued_credit", e))?;
                let lease_expires_at: DateTime<Utc> = row
                    .try_get("lease_expires_at")
                    .map_err(|e| StoreError::sqlx("Failed to read lease_expires_at", e))?;
                Ok(CreditWrite::Credited {
                    credit_added,
                    accrued_credit,
                    lease_expires_at,
                })
            }
            None if self.machine_exists(id).await? => Ok(CreditWrite::NoLease),
            None => Ok(CreditWrite::UnknownMachine),
        }
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        let tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::sqlx("Failed to begin transaction", e))?;
        Ok(Box::new(PostgresLedgerTransaction { tx }))
    }

    async fn upsert_machine(&self, machine: &MachineState) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vending_machines (machine_id, secret_key, pulse_rate)
            VALUES ($1, $2, $3)
            ON CONFLICT (machine_id) DO UPDATE
            SET secret_key = EXCLUDED.secret_key,
                pulse_rate = EXCLUDED.pulse_rate,
                updated_at = NOW()
            "#,
        )
        .bind(machine.id.as_str())
        .bind(machine.secret_key.as_deref())
        .bind(machine.pulse_rate)
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::sqlx("Failed to upsert machine", e))?;
        Ok(())
    }

    async fn add_vouchers(&self, vouchers: &[Voucher]) -> StoreResult<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::sqlx("Failed to begin transaction", e))?;

        let mut inserted = 0;
        for voucher in vouchers {
            let result = sqlx::query(
                r#"
                INSERT INTO vouchers (code, machine_id, duration_minutes, used_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(&voucher.code)
            .bind(voucher.machine_id.as_str())
            .bind(voucher.duration.minutes() as i32)
            .bind(voucher.used_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::sqlx("Failed to insert voucher", e))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::sqlx("Failed to commit vouchers", e))?;
        Ok(inserted)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map_err(|e| StoreError::sqlx("Health check failed", e))?;
        Ok(())
    }
}

struct PostgresLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresLedgerTransaction {
    async fn lock_machine(&mut self, id: &MachineId) -> StoreResult<Option<MachineState>> {
        let row = sqlx::query(&format!(
            "SELECT {MACHINE_COLUMNS} FROM vending_machines WHERE machine_id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::sqlx("Failed to lock machine", e))?;

        row.as_ref().map(map_machine).transpose()
    }

    async fn voucher_candidate(
        &mut self,
        id: &MachineId,
        duration: VoucherDuration,
        exclude: &[String],
    ) -> StoreResult<Option<Voucher>> {
        let row = sqlx::query(
            r#"
            SELECT code, machine_id, duration_minutes, used_at
            FROM vouchers
            WHERE machine_id = $1
              AND duration_minutes = $2
              AND used_at IS NULL
              AND NOT (code = ANY($3))
            ORDER BY created_at, code
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(id.as_str())
        .bind(duration.minutes() as i32)
        .bind(exclude.to_vec())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::sqlx("Failed to select voucher", e))?;

        row.as_ref().map(map_voucher).transpose()
    }

    async fn claim_voucher(&mut self, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET used_at = $2
            WHERE code = $1 AND used_at IS NULL
            "#,
        )
        .bind(code)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::sqlx("Failed to claim voucher", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_machine(&mut self, id: &MachineId, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE vending_machines
            SET accrued_credit = 0,
                lease_holder = NULL,
                lease_expires_at = $2,
                updated_at = $2
            WHERE machine_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::sqlx("Failed to reset machine", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "machine {id} vanished mid-transaction"
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::sqlx("Failed to commit redemption", e))
    }
}
