//! Wiring from a resolved [`Config`] to a running [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use neonvend_core::database::bounded;
use neonvend_core::database::ports::LedgerStore;
use neonvend_core::{
    Clock, CreditIngestor, InMemoryLedgerStore, KeyScope, LeaseManager, PostgresLedgerStore,
    PulseKey, PulseKeys, RedemptionEngine, ReplayPolicy, SessionDirectory, TokenDigester,
};

use crate::infra::app_state::AppState;
use crate::infra::config::{Config, SeedConfig, StoreBackend};

/// Open the configured ledger store, applying migrations when asked to.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.store {
        StoreBackend::Memory => {
            info!("using in-memory ledger store");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("postgres store selected without a database URL")?;
            let store = PostgresLedgerStore::connect(url, &config.database.pool)
                .await
                .context("failed to connect to PostgreSQL")?;
            if config.database.run_migrations {
                store.migrate().await.context("database migration failed")?;
            }
            Ok(Arc::new(store))
        }
    }
}

/// Build the ledger components over `store`.
pub fn build_state(
    config: Arc<Config>,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AppState> {
    let digester = match config.token_key.as_deref() {
        Some(key) => TokenDigester::new(key).context("invalid session token key")?,
        None => {
            info!("no AUTH_TOKEN_KEY configured; session digests use a per-process key");
            TokenDigester::ephemeral().context("failed to generate session token key")?
        }
    };

    let keys = match config.hardware.key_scope {
        KeyScope::Deployment => {
            let secret = config
                .hardware
                .hmac_secret
                .as_deref()
                .context("deployment key scope requires a hardware HMAC secret")?;
            PulseKeys::Deployment(PulseKey::new(secret).context("invalid hardware HMAC secret")?)
        }
        KeyScope::Machine => PulseKeys::PerMachine,
    };

    let ledger = &config.ledger;
    let hardware = &config.hardware;

    let sessions = SessionDirectory::new(digester, clock.clone()).with_ttl(config.sessions.ttl);
    let leases = LeaseManager::new(store.clone(), clock.clone())
        .with_lease_ttl(ledger.lease_ttl)
        .with_store_timeout(ledger.store_timeout);
    let credits = CreditIngestor::new(store.clone(), clock.clone(), keys)
        .with_replay_policy(
            ReplayPolicy::new(hardware.timestamp_mode)
                .with_tolerance(hardware.replay_tolerance)
                .with_uptime_cutoff(hardware.uptime_cutoff),
        )
        .with_renewal_window(hardware.renewal_window)
        .with_store_timeout(ledger.store_timeout);
    let redemptions = RedemptionEngine::new(store.clone(), clock)
        .with_store_timeout(ledger.store_timeout)
        .with_claim_attempts(ledger.claim_attempts);

    Ok(AppState {
        config,
        store,
        sessions: Arc::new(sessions),
        leases: Arc::new(leases),
        credits: Arc::new(credits),
        redemptions: Arc::new(redemptions),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub machines: usize,
    pub vouchers_inserted: u64,
}

/// Upsert seed machines, then insert seed vouchers. Existing voucher codes
/// are skipped, so reseeding is harmless.
pub async fn apply_seed(
    store: &dyn LedgerStore,
    seed: &SeedConfig,
    deadline: Duration,
) -> anyhow::Result<SeedSummary> {
    for machine in &seed.machines {
        bounded(deadline, store.upsert_machine(machine))
            .await
            .with_context(|| format!("failed to seed machine {}", machine.id))?;
    }

    let vouchers_inserted = if seed.vouchers.is_empty() {
        0
    } else {
        bounded(deadline, store.add_vouchers(&seed.vouchers))
            .await
            .context("failed to seed vouchers")?
    };

    Ok(SeedSummary {
        machines: seed.machines.len(),
        vouchers_inserted,
    })
}

/// Periodically drop expired sessions. Validation evicts lazily anyway; the
/// sweep only bounds memory held by abandoned tokens.
pub fn spawn_session_sweeper(sessions: Arc<SessionDirectory>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = sessions.len(), "expired sessions purged");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{ConfigMetadata, loader::compose, sources::EnvConfig};
    use neonvend_core::{MachineId, MachineState, ManualClock, Voucher, VoucherDuration};
    use rust_decimal::Decimal;

    fn config() -> Config {
        let env = EnvConfig {
            hmac_secret: Some("startup-test-secret".into()),
            ..EnvConfig::default()
        };
        compose(None, env, ConfigMetadata::default()).unwrap().config
    }

    #[tokio::test]
    async fn seeding_twice_inserts_vouchers_once() {
        let store = InMemoryLedgerStore::new();
        let vm = MachineId::parse("VM001").unwrap();
        let seed = SeedConfig {
            machines: vec![MachineState::new(vm.clone(), Decimal::ONE)],
            vouchers: vec![Voucher::unused(
                "SEED-1",
                vm.clone(),
                VoucherDuration::from_minutes(30).unwrap(),
            )],
        };

        let first = apply_seed(&store, &seed, Duration::from_secs(1)).await.unwrap();
        let second = apply_seed(&store, &seed, Duration::from_secs(1)).await.unwrap();

        assert_eq!(first.vouchers_inserted, 1);
        assert_eq!(second.vouchers_inserted, 0);
        assert_eq!(store.unused_vouchers(&vm).await, 1);
    }

    #[tokio::test]
    async fn build_state_uses_per_machine_keys_without_secret() {
        let mut config = config();
        config.hardware.key_scope = KeyScope::Machine;
        config.hardware.hmac_secret = None;

        let state = build_state(
            Arc::new(config),
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(ManualClock::starting_now()),
        )
        .unwrap();
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn deployment_scope_without_secret_fails_to_build() {
        let mut config = config();
        config.hardware.hmac_secret = None;

        let result = build_state(
            Arc::new(config),
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(ManualClock::starting_now()),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_sessions() {
        let clock = ManualClock::starting_now();
        let sessions = Arc::new(
            SessionDirectory::new(TokenDigester::new("k").unwrap(), Arc::new(clock.clone()))
                .with_ttl(Duration::from_secs(10)),
        );
        sessions.create_session("VM001").unwrap();

        let handle = spawn_session_sweeper(sessions.clone(), Duration::from_secs(30));
        clock.advance(chrono::Duration::seconds(11));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(sessions.is_empty());
        handle.abort();
    }
}
