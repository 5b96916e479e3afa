#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result, anyhow};
use axum::Router;
use axum_test::TestServer;
use neonvend_core::{
    InMemoryLedgerStore, MachineId, MachineState, ManualClock, Voucher, VoucherDuration,
    api::{CreateSessionResponse, routes::vending},
    database::ports::LedgerStore,
    sign_pulse,
};
use neonvend_server::infra::{
    app_state::AppState,
    config::{Config, ConfigMetadata, SeedConfig, loader::compose, sources::EnvConfig},
    startup::{apply_seed, build_state},
};
use neonvend_server::routes::create_app;
use rust_decimal::Decimal;
use serde_json::json;

pub const TEST_HMAC_SECRET: &str = "integration-test-hmac-secret";
pub const MACHINE: &str = "VM001";
pub const OTHER_MACHINE: &str = "VM002";

#[derive(Debug)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub clock: ManualClock,
    pub store: Arc<InMemoryLedgerStore>,
}

pub fn test_config() -> Result<Config> {
    let env = EnvConfig {
        store: Some("memory".into()),
        hmac_secret: Some(TEST_HMAC_SECRET.into()),
        auth_token_key: Some("integration-test-token-key".into()),
        dev_mode: Some(true),
        ..EnvConfig::default()
    };
    let load = compose(None, env, ConfigMetadata::default())
        .map_err(|err| anyhow!("failed to compose test config: {err}"))?;
    Ok(load.config)
}

/// Two machines at 1.00 per pulse. VM001 stocks two 60 minute vouchers and
/// one 30 minute voucher; VM002 stocks nothing.
pub fn default_seed() -> Result<SeedConfig> {
    let vm1 = MachineId::parse(MACHINE)?;
    let vm2 = MachineId::parse(OTHER_MACHINE)?;
    let hour = VoucherDuration::from_minutes(60)?;
    let half = VoucherDuration::from_minutes(30)?;

    Ok(SeedConfig {
        machines: vec![
            MachineState::new(vm1.clone(), Decimal::new(100, 2)),
            MachineState::new(vm2, Decimal::new(100, 2)),
        ],
        vouchers: vec![
            Voucher::unused("HOUR-A", vm1.clone(), hour),
            Voucher::unused("HOUR-B", vm1.clone(), hour),
            Voucher::unused("HALF-A", vm1, half),
        ],
    })
}

pub async fn build_test_app() -> Result<TestApp> {
    build_test_app_with(test_config()?, default_seed()?).await
}

pub async fn build_test_app_with(config: Config, seed: SeedConfig) -> Result<TestApp> {
    let store = Arc::new(InMemoryLedgerStore::new());
    apply_seed(store.as_ref(), &seed, config.ledger.store_timeout)
        .await
        .context("failed to seed test store")?;

    let clock = ManualClock::starting_now();
    let state = build_state(
        Arc::new(config),
        store.clone() as Arc<dyn LedgerStore>,
        Arc::new(clock.clone()),
    )?;

    let server = serve(create_app(state.clone()))?;
    Ok(TestApp {
        server,
        state,
        clock,
        store,
    })
}

pub fn serve(router: Router) -> Result<TestServer> {
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    TestServer::builder()
        .http_transport()
        .build(make_service)
        .map_err(|err| anyhow!(err.to_string()))
}

impl TestApp {
    pub async fn create_session(&self, machine_id: &str) -> String {
        let response = self
            .server
            .post(vending::SESSION_CREATE)
            .json(&json!({ "machineId": machine_id }))
            .await;
        response.assert_status_ok();
        response.json::<CreateSessionResponse>().session_token
    }

    /// Signed coin payload stamped with the test clock's current time.
    pub fn signed_coin(&self, machine_id: &str, pulses: u32) -> serde_json::Value {
        let timestamp = self.clock_now().timestamp().to_string();
        self.coin_with_timestamp(machine_id, pulses, &timestamp)
    }

    pub fn coin_with_timestamp(
        &self,
        machine_id: &str,
        pulses: u32,
        timestamp: &str,
    ) -> serde_json::Value {
        let signature = sign_pulse(TEST_HMAC_SECRET, machine_id, pulses, timestamp)
            .expect("test secret is not empty");
        json!({
            "machineId": machine_id,
            "pulseCount": pulses,
            "timestamp": timestamp,
            "signature": signature,
        })
    }

    pub fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        use neonvend_core::Clock;
        self.clock.now()
    }
}
