//! Machine and voucher administration against the PostgreSQL ledger.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use neonvend_core::database::bounded;
use neonvend_core::database::ports::LedgerStore;
use neonvend_core::database::postgres::PoolSettings;
use neonvend_core::{MachineId, MachineState, PostgresLedgerStore, Voucher, VoucherDuration};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::info;

use crate::cli::{DatabaseArgs, MachineCommand, VoucherCommand};

async fn connect(db: &DatabaseArgs) -> Result<PostgresLedgerStore> {
    let settings = PoolSettings {
        max_connections: 2,
        min_connections: 0,
        acquire_timeout: db.store_timeout,
        ..PoolSettings::default()
    };
    PostgresLedgerStore::connect(&db.database_url, &settings)
        .await
        .context("failed to connect to PostgreSQL")
}

pub async fn run_machine(command: MachineCommand) -> Result<Value> {
    match command {
        MachineCommand::Add {
            db,
            id,
            rate,
            secret,
        } => {
            let machine = machine_row(&id, rate, secret)?;
            let store = connect(&db).await?;
            bounded(db.store_timeout, store.upsert_machine(&machine))
                .await
                .with_context(|| format!("failed to save machine {id}"))?;
            info!(machine = %machine.id, rate = %machine.pulse_rate, "machine saved");
            Ok(json!({
                "id": machine.id.as_str(),
                "pulseRate": machine.pulse_rate,
                "perMachineKey": machine.secret_key.is_some(),
            }))
        }
        MachineCommand::Show { db, id } => {
            let id = MachineId::parse(&id)?;
            let store = connect(&db).await?;
            let machine = bounded(db.store_timeout, store.load_machine(&id))
                .await?
                .with_context(|| format!("machine {id} not found"))?;
            Ok(describe(&machine, Utc::now()))
        }
        MachineCommand::Release { db, id } => {
            let id = MachineId::parse(&id)?;
            let store = connect(&db).await?;
            if !bounded(db.store_timeout, store.release(&id, Utc::now())).await? {
                bail!("machine {id} not found");
            }
            info!(machine = %id, "lease released");
            Ok(json!({ "id": id.as_str(), "released": true }))
        }
    }
}

pub async fn run_vouchers(command: VoucherCommand) -> Result<Value> {
    match command {
        VoucherCommand::Add {
            db,
            machine,
            duration,
            codes,
        } => {
            let vouchers = voucher_batch(&machine, duration, &codes)?;
            let store = connect(&db).await?;
            let inserted = bounded(db.store_timeout, store.add_vouchers(&vouchers))
                .await
                .context("failed to insert vouchers")?;
            info!(machine = %machine, inserted, "vouchers added");
            Ok(json!({
                "machineId": machine,
                "durationMinutes": duration,
                "inserted": inserted,
                "skipped": vouchers.len() as u64 - inserted,
            }))
        }
    }
}

fn machine_row(id: &str, rate: Decimal, secret: Option<String>) -> Result<MachineState> {
    let id = MachineId::parse(id)?;
    if rate <= Decimal::ZERO {
        bail!("pulse rate must be positive, got {rate}");
    }
    let machine = MachineState::new(id, rate);
    Ok(match secret.filter(|s| !s.is_empty()) {
        Some(secret) => machine.with_secret_key(secret),
        None => machine,
    })
}

fn voucher_batch(machine: &str, minutes: i64, codes: &[String]) -> Result<Vec<Voucher>> {
    let machine = MachineId::parse(machine)?;
    let duration = VoucherDuration::from_minutes(minutes)?;

    let mut seen = std::collections::HashSet::new();
    let mut vouchers = Vec::with_capacity(codes.len());
    for code in codes.iter().map(|c| c.trim()) {
        if code.is_empty() {
            bail!("voucher codes must not be blank");
        }
        if seen.insert(code) {
            vouchers.push(Voucher::unused(code, machine.clone(), duration));
        }
    }
    Ok(vouchers)
}

fn describe(machine: &MachineState, now: chrono::DateTime<Utc>) -> Value {
    let locked = machine.is_locked(now);
    json!({
        "id": machine.id.as_str(),
        "pulseRate": machine.pulse_rate,
        "perMachineKey": machine.secret_key.is_some(),
        "locked": locked,
        "leaseHolder": machine.lease_holder.as_ref().map(|h| preview(h.as_str())),
        "leaseExpiresAt": machine.lease_expires_at,
        "accruedCredit": machine.accrued_credit,
    })
}

fn preview(digest: &str) -> String {
    let head: String = digest.chars().take(8).collect();
    format!("{head}…")
}
